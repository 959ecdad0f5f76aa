// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The persist bridge (§6): the contract to an opaque, externally-owned persistence store.
//! Modules register a `(key, interval, scope)` tuple with get/set/clear callbacks; this core
//! never touches the store's on-disk format, only the length-prefixed blob layout the
//! callbacks exchange.

use crate::stats::StatValue;
use core_protocol::id::{PersistInterval, PersistScope, PlayerId, StatCode};
use std::sync::Mutex;

/// Tag byte identifying a [`StatValue`] variant in the persisted blob.
mod tag {
    pub const I32: u8 = 0;
    pub const U32: u8 = 1;
    pub const I64: u8 = 2;
    pub const U64: u8 = 3;
    pub const TIMESTAMP: u8 = 4;
    pub const DURATION_MILLIS: u8 = 5;
}

/// Serializes one `(code, value)` entry as `code:i32 LE, tag:u8, payload`.
fn encode_entry(code: StatCode, value: StatValue, out: &mut Vec<u8>) {
    out.extend_from_slice(&code.0.to_le_bytes());
    match value {
        StatValue::I32(v) => {
            out.push(tag::I32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        StatValue::U32(v) => {
            out.push(tag::U32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        StatValue::I64(v) => {
            out.push(tag::I64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        StatValue::U64(v) => {
            out.push(tag::U64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        StatValue::Timestamp(t) => {
            out.push(tag::TIMESTAMP);
            out.extend_from_slice(&t.to_le_bytes());
        }
        StatValue::Duration { elapsed, .. } => {
            out.push(tag::DURATION_MILLIS);
            out.extend_from_slice(&(elapsed.as_millis() as u64).to_le_bytes());
        }
    }
}

fn decode_entry(bytes: &[u8]) -> Option<(StatCode, StatValue, usize)> {
    if bytes.len() < 5 {
        return None;
    }
    let code = StatCode(i32::from_le_bytes(bytes[0..4].try_into().ok()?));
    let variant = bytes[4];
    let payload = &bytes[5..];
    let (value, len) = match variant {
        tag::I32 => (StatValue::I32(i32::from_le_bytes(payload.get(0..4)?.try_into().ok()?)), 4),
        tag::U32 => (StatValue::U32(u32::from_le_bytes(payload.get(0..4)?.try_into().ok()?)), 4),
        tag::I64 => (StatValue::I64(i64::from_le_bytes(payload.get(0..8)?.try_into().ok()?)), 8),
        tag::U64 => (StatValue::U64(u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?)), 8),
        tag::TIMESTAMP => (StatValue::Timestamp(u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?)), 8),
        tag::DURATION_MILLIS => (
            StatValue::Duration {
                elapsed: std::time::Duration::from_millis(u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?)),
                running_since: None,
            },
            8,
        ),
        _ => return None,
    };
    Some((code, value, 5 + len))
}

/// Serializes `entries` to the length-prefixed blob the persist store hands back on
/// `GetData`: a `u32` entry count followed by each entry in turn.
pub fn serialize(entries: &[(StatCode, StatValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for &(code, value) in entries {
        encode_entry(code, value, &mut out);
    }
    out
}

/// Parses a blob produced by [`serialize`]. A malformed trailing entry is dropped rather
/// than failing the whole read, matching §7's "transient I/O failure: logged, in-memory
/// state kept" posture for read-side corruption.
pub fn deserialize(blob: &[u8]) -> Vec<(StatCode, StatValue)> {
    if blob.len() < 4 {
        return Vec::new();
    }
    let count = u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut cursor = 4;
    for _ in 0..count {
        match decode_entry(&blob[cursor..]) {
            Some((code, value, consumed)) => {
                entries.push((code, value));
                cursor += consumed;
            }
            None => break,
        }
    }
    entries
}

type GetDataFn = Box<dyn Fn(PlayerId) -> Vec<u8> + Send + Sync>;
type SetDataFn = Box<dyn Fn(PlayerId, &[u8]) + Send + Sync>;
type ClearDataFn = Box<dyn Fn(PlayerId) + Send + Sync>;

struct Registration {
    key: i32,
    interval: PersistInterval,
    scope: PersistScope,
    get_data: GetDataFn,
    set_data: SetDataFn,
    clear_data: ClearDataFn,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PersistToken(usize);

/// Registry of `(key, interval, scope)` persistence hooks. The actual store (its schema,
/// grouping of arenas into score groups, and on-disk format) lives entirely outside this
/// core; this type only remembers which callbacks to invoke when the store asks.
#[derive(Default)]
pub struct PersistBridge {
    registrations: Mutex<Vec<Option<Registration>>>,
}

impl PersistBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        key: i32,
        interval: PersistInterval,
        scope: PersistScope,
        get_data: GetDataFn,
        set_data: SetDataFn,
        clear_data: ClearDataFn,
    ) -> PersistToken {
        let mut registrations = self.registrations.lock().unwrap();
        registrations.push(Some(Registration { key, interval, scope, get_data, set_data, clear_data }));
        PersistToken(registrations.len() - 1)
    }

    pub fn unregister(&self, token: PersistToken) {
        if let Some(slot) = self.registrations.lock().unwrap().get_mut(token.0) {
            *slot = None;
        }
    }

    /// Invoked by the store when it wants to save `owner`'s state for every registered key.
    pub fn get_data(&self, owner: PlayerId) -> Vec<(i32, PersistInterval, PersistScope, Vec<u8>)> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|r| (r.key, r.interval, r.scope, (r.get_data)(owner)))
            .collect()
    }

    /// Invoked by the store when it restores `owner`'s previously-saved state for `key`.
    pub fn set_data(&self, owner: PlayerId, key: i32, blob: &[u8]) {
        if let Some(registration) = self.registrations.lock().unwrap().iter().flatten().find(|r| r.key == key) {
            (registration.set_data)(owner, blob);
        }
    }

    pub fn clear_data(&self, owner: PlayerId, key: i32) {
        if let Some(registration) = self.registrations.lock().unwrap().iter().flatten().find(|r| r.key == key) {
            (registration.clear_data)(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_protocol::id::stat_code;

    #[test]
    fn round_trips_every_variant() {
        let entries = vec![
            (stat_code::KILL_POINTS, StatValue::I32(-5)),
            (StatCode(100), StatValue::U32(42)),
            (StatCode(101), StatValue::I64(-9_000_000_000)),
            (StatCode(102), StatValue::U64(9_000_000_000)),
            (StatCode(103), StatValue::Timestamp(1_700_000_000)),
            (
                StatCode(104),
                StatValue::Duration { elapsed: std::time::Duration::from_secs(125), running_since: None },
            ),
        ];
        let blob = serialize(&entries);
        let restored = deserialize(&blob);
        assert_eq!(restored.len(), entries.len());
        for ((code, value), (rcode, rvalue)) in entries.iter().zip(restored.iter()) {
            assert_eq!(code, rcode);
            assert_eq!(value.as_i64(), rvalue.as_i64());
        }
    }

    #[test]
    fn legacy_u64_promotes_to_requested_variant_via_as_i64() {
        let legacy = StatValue::U64(7);
        assert_eq!(legacy.as_i64(), 7);
    }

    #[test]
    fn truncated_blob_drops_the_partial_trailing_entry() {
        let entries = vec![(StatCode(1), StatValue::I32(5)), (StatCode(2), StatValue::I32(6))];
        let mut blob = serialize(&entries);
        blob.truncate(blob.len() - 2);
        let restored = deserialize(&blob);
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn register_then_get_data_invokes_callback() {
        let bridge = PersistBridge::new();
        bridge.register(
            1,
            PersistInterval::Forever,
            PersistScope::PerArena,
            Box::new(|_owner| vec![9, 9]),
            Box::new(|_owner, _blob| {}),
            Box::new(|_owner| {}),
        );
        let player = PlayerId(std::num::NonZeroU32::new(1).unwrap());
        let saved = bridge.get_data(player);
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].3, vec![9, 9]);
    }
}
