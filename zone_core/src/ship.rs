// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! An 8-bit set over the eight playable ships (§3).

use core_protocol::id::Ship;
use std::ops::{BitAnd, BitOr};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ShipMask(u8);

impl ShipMask {
    pub const NONE: ShipMask = ShipMask(0);
    pub const ALL: ShipMask = ShipMask(0xFF);

    pub fn single(ship: Ship) -> Self {
        if ship.is_spectator() {
            return Self::NONE;
        }
        Self(1 << (ship as u8))
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, ship: Ship) -> bool {
        if ship.is_spectator() {
            return true;
        }
        self.0 & (1 << (ship as u8)) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True iff every ship set in `self` is also set in `other`.
    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & other.0 == self.0
    }

    pub fn iter(self) -> impl Iterator<Item = Ship> {
        Ship::PLAYABLE.into_iter().filter(move |s| self.contains(*s))
    }
}

impl BitAnd for ShipMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitOr for ShipMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_narrows() {
        let a = ShipMask::single(Ship::Warbird).union(ShipMask::single(Ship::Javelin));
        let b = ShipMask::single(Ship::Javelin).union(ShipMask::single(Ship::Spider));
        assert_eq!(a & b, ShipMask::single(Ship::Javelin));
    }

    #[test]
    fn all_contains_every_playable_ship() {
        for ship in Ship::PLAYABLE {
            assert!(ShipMask::ALL.contains(ship));
        }
    }
}
