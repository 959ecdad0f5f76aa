// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flag-game scoring (§4.7): carry-all and own-all-dropped (warzone) win detection, reward
//! computation, and victory-music cues.

use core_protocol::id::{Freq, PlayerId};
use std::time::Instant;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlagMode {
    /// `Flag:FlagMode = 0`. A flag is picked up and carried; win checks run on every pickup.
    CarryAll,
    /// `Flag:FlagMode = 1`. A flag is claimed where it sits ("dropped"); win checks run on
    /// every flag-on-map event, with a victory-music cue on the last-flag claim.
    OwnAllDropped,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlagState {
    None,
    OnMap,
    Carried,
}

#[derive(Copy, Clone, Debug)]
pub enum FlagLocation {
    Tile(i16, i16),
    Carrier(PlayerId),
}

#[derive(Copy, Clone, Debug)]
pub struct FlagSlot {
    pub state: FlagState,
    pub location: FlagLocation,
    pub owner_freq: Option<Freq>,
    pub updated_at: Instant,
}

impl FlagSlot {
    pub fn unclaimed(x: i16, y: i16, now: Instant) -> Self {
        Self {
            state: FlagState::OnMap,
            location: FlagLocation::Tile(x, y),
            owner_freq: None,
            updated_at: now,
        }
    }
}

pub struct FlagGame {
    pub mode: FlagMode,
    pub flags: Vec<FlagSlot>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MusicCue {
    Start,
    Stop,
}

impl FlagGame {
    pub fn new(mode: FlagMode, flags: Vec<FlagSlot>) -> Self {
        Self { mode, flags }
    }

    /// Carry-all pickup: moves `flag_id` to `Carried` under `carrier`'s freq and checks for a
    /// win (all flags carried by a single freq).
    pub fn on_pickup(&mut self, flag_id: usize, carrier: PlayerId, carrier_freq: Freq, now: Instant) -> Option<Freq> {
        self.flags[flag_id] = FlagSlot {
            state: FlagState::Carried,
            location: FlagLocation::Carrier(carrier),
            owner_freq: Some(carrier_freq),
            updated_at: now,
        };
        self.check_carry_all_win()
    }

    fn check_carry_all_win(&self) -> Option<Freq> {
        if !self.flags.iter().all(|f| f.state == FlagState::Carried) {
            return None;
        }
        let first = self.flags.first()?.owner_freq?;
        self.flags
            .iter()
            .all(|f| f.owner_freq == Some(first))
            .then_some(first)
    }

    /// A flag carrier is killed or drops: the flag reverts and any in-progress claim is
    /// broken, emitting a music-stop cue for `OwnAllDropped` arenas.
    pub fn on_drop(&mut self, flag_id: usize, x: i16, y: i16, now: Instant) -> Option<MusicCue> {
        let was_complete = self.mode == FlagMode::OwnAllDropped && self.check_warzone_win().is_some();
        self.flags[flag_id] = FlagSlot::unclaimed(x, y, now);
        was_complete.then_some(MusicCue::Stop)
    }

    /// Own-all-dropped claim: marks `flag_id` owned by `owner_freq` where it sits. Checked on
    /// every such event; a music-start cue fires only when this claim completes the set.
    pub fn on_claim(&mut self, flag_id: usize, owner_freq: Freq, now: Instant) -> (Option<Freq>, Option<MusicCue>) {
        if let FlagLocation::Tile(x, y) = self.flags[flag_id].location {
            self.flags[flag_id] = FlagSlot {
                state: FlagState::OnMap,
                location: FlagLocation::Tile(x, y),
                owner_freq: Some(owner_freq),
                updated_at: now,
            };
        }
        let winner = self.check_warzone_win();
        let cue = winner.map(|_| MusicCue::Start);
        (winner, cue)
    }

    fn check_warzone_win(&self) -> Option<Freq> {
        if !self.flags.iter().all(|f| f.state == FlagState::OnMap) {
            return None;
        }
        let first = self.flags.first()?.owner_freq?;
        if first == Freq(-1) {
            return None;
        }
        self.flags
            .iter()
            .all(|f| f.owner_freq == Some(first))
            .then_some(first)
    }

    /// Resets every flag to unclaimed at its last known tile, keyed by the winner for
    /// bookkeeping by the caller (e.g. ending the `Game` persist interval).
    pub fn reset_with_winner(&mut self, now: Instant) {
        for flag in &mut self.flags {
            let (x, y) = match flag.location {
                FlagLocation::Tile(x, y) => (x, y),
                FlagLocation::Carrier(_) => (0, 0),
            };
            *flag = FlagSlot::unclaimed(x, y, now);
        }
    }
}

/// `(playerCount^2 * Flag:FlagReward) / 1000`, plus jackpot, divided by team size when
/// `Flag:SplitPoints` is set.
pub fn reward_points(flag_reward: i32, player_count: u32, jackpot: i32, split_points: bool, team_size: u32) -> i32 {
    let base = (player_count as i64).pow(2) * flag_reward as i64 / 1000 + jackpot as i64;
    if split_points && team_size > 0 {
        (base / team_size as i64) as i32
    } else {
        base as i32
    }
}
