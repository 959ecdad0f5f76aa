// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashSet;
use std::hash::Hash;

/// Tracks which keys changed since the last time they were drained, without needing to
/// diff the whole collection. Used to mark dirty stats between score broadcasts.
#[derive(Debug)]
pub struct NotifySet<T> {
    pub add: HashSet<T>,
    pub remove: HashSet<T>,
}

impl<T: Eq + Hash> NotifySet<T> {
    pub fn new() -> Self {
        Self {
            add: HashSet::new(),
            remove: HashSet::new(),
        }
    }

    pub fn added(&mut self, key: T) {
        self.remove.remove(&key);
        self.add.insert(key);
    }

    pub fn removed(&mut self, key: T) {
        self.add.remove(&key);
        self.remove.insert(key);
    }
}

impl<T: Eq + Hash> Default for NotifySet<T> {
    fn default() -> Self {
        Self::new()
    }
}
