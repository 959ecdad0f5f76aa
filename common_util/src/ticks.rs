// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use core_protocol::serde_util::F32Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::*;
use std::time::Duration;

pub type TicksRepr = u32;

/// A duration counted in mainloop ticks, generic over the tick frequency. One tick of the
/// zone server's mainloop is 10ms, i.e. `GenTicks<100>`; a type alias is provided below.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GenTicks<const FREQUENCY_HZ: TicksRepr>(pub TicksRepr);

/// Mainloop tick count, at the zone server's fixed 100Hz (10ms) tick rate.
pub type Ticks = GenTicks<100>;

impl<const FREQUENCY_HZ: TicksRepr> GenTicks<FREQUENCY_HZ> {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const MAX: Self = Self(TicksRepr::MAX);
    pub const FREQUENCY_HZ: Self = GenTicks(FREQUENCY_HZ);
    pub const PERIOD_SECS: f32 = 1.0 / (Self::FREQUENCY_HZ.0 as f32);

    pub fn from_secs(secs: f32) -> Self {
        Self((secs * Self::FREQUENCY_HZ.0 as f32) as TicksRepr)
    }

    pub const fn from_whole_secs(secs: TicksRepr) -> Self {
        Self(secs.saturating_mul(Self::FREQUENCY_HZ.0))
    }

    pub const fn from_whole_millis(millis: u32) -> Self {
        Self((millis * Self::FREQUENCY_HZ.0) / 1000)
    }

    pub fn to_secs(self) -> f32 {
        self.0 as f32 * Self::PERIOD_SECS
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_secs_f32(self.to_secs())
    }

    pub fn from_duration(d: Duration) -> Self {
        Self::from_secs(d.as_secs_f32())
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn wrapping_add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }

    pub fn next(self) -> Self {
        self.wrapping_add(Self::ONE)
    }

    /// Returns true iff `self` is a multiple of `period` (`period == ZERO` never fires).
    pub fn every(self, period: Self) -> bool {
        period.0 != 0 && self.0 % period.0 == 0
    }
}

impl<const FREQUENCY_HZ: TicksRepr> Add for GenTicks<FREQUENCY_HZ> {
    type Output = Self;
    fn add(self, other: Self) -> Self::Output {
        Self(self.0 + other.0)
    }
}

impl<const FREQUENCY_HZ: TicksRepr> AddAssign for GenTicks<FREQUENCY_HZ> {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl<const FREQUENCY_HZ: TicksRepr> Sub for GenTicks<FREQUENCY_HZ> {
    type Output = Self;
    fn sub(self, other: Self) -> Self::Output {
        Self(self.0 - other.0)
    }
}

impl<const FREQUENCY_HZ: TicksRepr> fmt::Debug for GenTicks<FREQUENCY_HZ> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}s", self.to_secs())
    }
}

impl<const FREQUENCY_HZ: TicksRepr> Serialize for GenTicks<FREQUENCY_HZ> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_f32(self.to_secs())
        } else {
            serializer.serialize_u32(self.0)
        }
    }
}

impl<'de, const FREQUENCY_HZ: TicksRepr> Deserialize<'de> for GenTicks<FREQUENCY_HZ> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer
                .deserialize_f32(F32Visitor)
                .map(GenTicks::from_secs)
        } else {
            deserializer
                .deserialize_u32(U32ViaU16Adapter)
                .map(GenTicks)
        }
    }
}

/// Bincode emits `u32` as 4 bytes; the shared [`U16Visitor`] only covers `u16`, so this
/// thin adapter reuses it for the common small-tick-count case and falls back otherwise.
struct U32ViaU16Adapter;

impl<'de> serde::de::Visitor<'de> for U32ViaU16Adapter {
    type Value = u32;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned 32-bit integer")
    }

    fn visit_u32<E: serde::de::Error>(self, v: u32) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_change_interval_is_five_seconds() {
        let interval = Ticks::from_whole_millis(5000);
        assert_eq!(interval.0, 500);
        assert_eq!(interval.to_secs(), 5.0);
    }

    #[test]
    fn every_divides_evenly() {
        let period = Ticks(10);
        assert!(Ticks(0).every(period));
        assert!(Ticks(20).every(period));
        assert!(!Ticks(15).every(period));
    }
}
