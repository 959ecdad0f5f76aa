// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types shared across the zone server crates: stable identifiers, names, and the
//! server-to-client wire payloads. Owning these in one crate keeps `zone_core` and `zoned`
//! from having to agree on layout by convention.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod id;
pub mod name;
pub mod serde_util;
pub mod wire;

pub type UnixTime = u64;

pub fn get_unix_time_now() -> UnixTime {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        _ => 0,
    }
}
