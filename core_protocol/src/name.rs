// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The name an [`Arena`](crate) is keyed by in the Arena Manager's dictionary, e.g. `"turf"`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ArenaName(ArrayString<24>);

impl ArenaName {
    pub fn new(str: &str) -> Self {
        let mut s = ArrayString::<24>::new();
        for c in str.chars() {
            if s.try_push(c).is_err() {
                break;
            }
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ArenaName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player's displayed alias, NOT their authenticated identity.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PlayerAlias(ArrayString<23>);

impl PlayerAlias {
    pub fn new(str: &str) -> Self {
        let mut s = ArrayString::<23>::new();
        for c in str.chars() {
            if s.try_push(c).is_err() {
                break;
            }
        }
        if s.is_empty() {
            return Self::default();
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlayerAlias {
    fn default() -> Self {
        Self(ArrayString::from("Newbie").unwrap())
    }
}

impl Display for PlayerAlias {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
