// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-arena jackpot counter (§4.12): bleeds a share of kill bounties into end-of-game
//! flag/KOTH rewards.

use core_protocol::name::ArenaName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct Jackpot {
    value: AtomicI32,
}

impl Jackpot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, amount: i32) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// `jackpot += floor(bounty * Kill:JackpotBountyPercent / 1000)`.
    pub fn on_kill(&self, bounty: u16, jackpot_bounty_percent: i32) {
        let share = (bounty as i64 * jackpot_bounty_percent as i64) / 1000;
        self.add(share as i32);
    }

    /// Serializes to the persisted 4-byte little-endian representation (§4.12).
    pub fn to_persisted_bytes(&self) -> [u8; 4] {
        self.get().to_le_bytes()
    }

    pub fn from_persisted_bytes(bytes: [u8; 4]) -> Self {
        Self {
            value: AtomicI32::new(i32::from_le_bytes(bytes)),
        }
    }
}

/// One jackpot per arena, handed out on first touch. Shared across the ball/flag/KOTH/kill
/// modules so a kill's bounty share and a flag/KOTH win's payout see the same counter.
#[derive(Default)]
pub struct JackpotRegistry {
    arenas: RwLock<HashMap<ArenaName, Arc<Jackpot>>>,
}

impl JackpotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jackpot_for(&self, arena: ArenaName) -> Arc<Jackpot> {
        if let Some(existing) = self.arenas.read().unwrap().get(&arena) {
            return Arc::clone(existing);
        }
        let mut writer = self.arenas.write().unwrap();
        Arc::clone(writer.entry(arena).or_insert_with(|| Arc::new(Jackpot::new())))
    }
}
