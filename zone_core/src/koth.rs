// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! King-of-the-Hill (§4.8): the `Stopped -> Starting -> Running -> Stopped` state machine,
//! per-kill crown rules, and win detection.

use core_protocol::id::{Freq, PlayerId};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KothPhase {
    Stopped,
    Starting,
    Running,
}

/// Per-player KOTH state. `expire` absent implies `has_crown == false` (§3 invariant).
#[derive(Copy, Clone, Debug, Default)]
pub struct KothPlayerState {
    pub has_crown: bool,
    pub expire: Option<Instant>,
    pub death_count: u32,
    pub crown_kill_count: u32,
}

pub struct KothConfig {
    pub auto_start: bool,
    pub min_players: u32,
    pub start_delay: Duration,
    pub expire_time: Duration,
    pub death_count: u32,
    pub non_crown_adjust_time: Duration,
    pub non_crown_minimum_bounty: u16,
    pub crown_recover_kills: u32,
    pub reward_factor: i32,
    pub split_points: bool,
}

pub struct Koth {
    pub phase: KothPhase,
    pub start_after: Option<Instant>,
    pub initial_participants: Vec<PlayerId>,
    pub initial_player_count: u32,
}

impl Koth {
    pub fn new(config: &KothConfig) -> Self {
        Self {
            phase: if config.auto_start { KothPhase::Starting } else { KothPhase::Stopped },
            start_after: None,
            initial_participants: Vec::new(),
            initial_player_count: 0,
        }
    }
}

impl Koth {
    /// `?resetkoth`: forces the game back to `Stopped` (or straight into `Starting` if
    /// `King:AutoStart` is set), clearing any in-progress countdown. Per-player crown state
    /// is the caller's to clear, since it lives in the caller's own player map.
    pub fn force_stop(&mut self, config: &KothConfig) {
        self.phase = if config.auto_start { KothPhase::Starting } else { KothPhase::Stopped };
        self.start_after = None;
        self.initial_participants.clear();
        self.initial_player_count = 0;
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum CountdownUpdate {
    Unchanged,
    NotEnoughPlayers,
    CountdownStarted(Instant),
    Expired,
}

impl Koth {
    /// Runs once per second while `Starting`, per §4.8.
    pub fn tick_countdown(&mut self, now: Instant, in_ship_players: &[PlayerId], config: &KothConfig) -> CountdownUpdate {
        debug_assert_eq!(self.phase, KothPhase::Starting);
        let count = in_ship_players.len() as u32;
        if count < config.min_players {
            return if self.start_after.take().is_some() {
                CountdownUpdate::NotEnoughPlayers
            } else {
                CountdownUpdate::Unchanged
            };
        }
        match self.start_after {
            None => {
                let at = now + config.start_delay;
                self.start_after = Some(at);
                CountdownUpdate::CountdownStarted(at)
            }
            Some(at) if now >= at => {
                self.phase = KothPhase::Running;
                self.initial_participants = in_ship_players.to_vec();
                self.initial_player_count = count;
                self.start_after = None;
                CountdownUpdate::Expired
            }
            Some(_) => CountdownUpdate::Unchanged,
        }
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct KillOutcome {
    pub killed_crown_removed: bool,
    pub killer_crown_reset: bool,
    pub killer_crown_extended: bool,
    pub killer_crown_recovered: bool,
}

/// Applies the per-kill crown rules of §4.8 to `killer`/`killed` in place.
pub fn on_kill(
    killer: &mut KothPlayerState,
    killed: &mut KothPlayerState,
    killer_bounty: u16,
    config: &KothConfig,
    now: Instant,
) -> KillOutcome {
    let mut outcome = KillOutcome::default();
    let killed_had_crown = killed.has_crown;

    if killed_had_crown {
        killed.death_count += 1;
        if killed.death_count > config.death_count {
            killed.has_crown = false;
            killed.expire = None;
            outcome.killed_crown_removed = true;
        }
    }

    if killer.has_crown {
        if killed_had_crown {
            killer.expire = Some(now + config.expire_time);
            outcome.killer_crown_reset = true;
        } else if killer_bounty >= config.non_crown_minimum_bounty {
            let full = now + config.expire_time;
            let extended = killer.expire.unwrap_or(now) + config.non_crown_adjust_time;
            killer.expire = Some(extended.min(full));
            outcome.killer_crown_extended = true;
        }
    } else if killed_had_crown {
        killer.crown_kill_count += 1;
        if killer.crown_kill_count >= config.crown_recover_kills {
            killer.has_crown = true;
            killer.expire = Some(now + config.expire_time);
            killer.death_count = 0;
            killer.crown_kill_count = 0;
            outcome.killer_crown_recovered = true;
        }
    }

    outcome
}

#[derive(Debug, Eq, PartialEq)]
pub enum WinCheck {
    None,
    Winner(Freq, Vec<PlayerId>),
    /// No freq-unanimous winner yet; expire this player's crown (oldest-remaining) and retry.
    ExpireOldest(PlayerId),
}

/// `crowned` is every currently-crowned player with their freq and expire instant;
/// `just_lost` is the set of players whose crown was removed this tick (for the
/// simultaneous-loss winner case).
pub fn check_win(crowned: &[(PlayerId, Freq, Instant)], just_lost: &[(PlayerId, Freq)]) -> WinCheck {
    if crowned.len() == 1 {
        let (player, freq, _) = crowned[0];
        return WinCheck::Winner(freq, vec![player]);
    }
    if !crowned.is_empty() {
        let first_freq = crowned[0].1;
        if crowned.iter().all(|(_, freq, _)| *freq == first_freq) {
            return WinCheck::Winner(first_freq, crowned.iter().map(|(p, _, _)| *p).collect());
        }
        let oldest = crowned.iter().min_by_key(|(_, _, expire)| *expire).unwrap();
        return WinCheck::ExpireOldest(oldest.0);
    }
    if !just_lost.is_empty() {
        let first_freq = just_lost[0].1;
        let freqs: HashSet<Freq> = just_lost.iter().map(|(_, f)| *f).collect();
        if freqs.len() == 1 {
            return WinCheck::Winner(first_freq, just_lost.iter().map(|(p, _)| *p).collect());
        }
    }
    WinCheck::None
}

/// `initialPlayerCount^2 * King:RewardFactor / 1000`, plus jackpot, divided by winner count
/// when `King:SplitPoints` is set.
pub fn reward_points(initial_player_count: u32, reward_factor: i32, jackpot: i32, split_points: bool, winner_count: u32) -> i32 {
    let base = (initial_player_count as i64).pow(2) * reward_factor as i64 / 1000 + jackpot as i64;
    if split_points && winner_count > 0 {
        (base / winner_count as i64) as i32
    } else {
        base as i32
    }
}
