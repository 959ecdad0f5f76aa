// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU32;

/// Stable, process-wide numeric identity of a connected player.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PlayerId(pub NonZeroU32);

impl PlayerId {
    /// Draws a fresh, random id. The [`super::PlayerRegistry`] is responsible for rejecting
    /// collisions, which are astronomically unlikely but not impossible.
    pub fn generate() -> Self {
        loop {
            let candidate: u32 = rand::thread_rng().gen();
            if let Some(n) = NonZeroU32::new(candidate) {
                return Self(n);
            }
        }
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A team number. Freq assignment is convention-driven by the [`FreqManager`](crate) advisor
/// chain; the core only guarantees the representation.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Freq(pub i16);

impl Freq {
    pub const SPEC: Freq = Freq(8025);

    /// Index into a fixed-size, 8-wide team-score array.
    pub fn score_index(self) -> usize {
        self.0.rem_euclid(8) as usize
    }
}

impl Display for Freq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The eight playable ships plus the non-playing spectator pseudo-ship, matching the
/// wire protocol's ship byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ship {
    Warbird = 0,
    Javelin = 1,
    Spider = 2,
    Leviathan = 3,
    Terrier = 4,
    Weasel = 5,
    Lancaster = 6,
    Shark = 7,
    Spectator = 8,
}

impl Ship {
    pub const PLAYABLE: [Ship; 8] = [
        Ship::Warbird,
        Ship::Javelin,
        Ship::Spider,
        Ship::Leviathan,
        Ship::Terrier,
        Ship::Weasel,
        Ship::Lancaster,
        Ship::Shark,
    ];

    pub fn from_u8(b: u8) -> Option<Self> {
        Self::PLAYABLE
            .into_iter()
            .chain(std::iter::once(Ship::Spectator))
            .find(|s| *s as u8 == b)
    }

    pub fn is_spectator(self) -> bool {
        matches!(self, Ship::Spectator)
    }
}

impl Display for Ship {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The aggregation bucket for a stat.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PersistScope {
    Global,
    PerArena,
}

/// A reset boundary for statistics. `Custom` allows `Stats:AdditionalIntervals` to extend
/// the canonical set without widening this enum on every config change.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PersistInterval {
    Forever,
    Reset,
    Game,
    Custom(u8),
}

impl PersistInterval {
    pub const ALL: [PersistInterval; 3] =
        [PersistInterval::Forever, PersistInterval::Reset, PersistInterval::Game];

    fn discriminant(self) -> u8 {
        match self {
            PersistInterval::Forever => 0,
            PersistInterval::Reset => 1,
            PersistInterval::Game => 2,
            PersistInterval::Custom(n) => 3 + n,
        }
    }
}

impl Ord for PersistInterval {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.discriminant().cmp(&other.discriminant())
    }
}
impl PartialOrd for PersistInterval {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A signed stat identifier, as stored in the persist blob. The catalog of well-known codes
/// lives in `core_protocol::stat_code`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct StatCode(pub i32);

pub mod stat_code {
    //! Canonical stat codes. Negative codes are reserved for core-defined stats so that
    //! game-specific modules can allocate positive codes without collision.
    use super::StatCode;

    pub const KILL_POINTS: StatCode = StatCode(-1);
    pub const FLAG_POINTS: StatCode = StatCode(-2);
    pub const KILLS: StatCode = StatCode(-3);
    pub const DEATHS: StatCode = StatCode(-4);
    pub const ARENA_TOTAL_TIME: StatCode = StatCode(-5);
    pub const KOTH_GAMES_WON: StatCode = StatCode(-6);
    pub const LAST_SEEN: StatCode = StatCode(-7);
}
