// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic reward (§4.10): a recurring per-freq flag-point payout, fragmented across the
//! protocol's 513-byte reward-packet payload cap.

use core_protocol::id::{Freq, PlayerId};
use core_protocol::wire::{PeriodicReward, PeriodicRewardItem};

pub struct PeriodicConfig {
    pub reward_delay: common_util::ticks::Ticks,
    /// `> 0`: flat per-flag reward. `<= 0`: `|reward_points|` scaled by total player count.
    pub reward_points: i32,
    pub split_points: bool,
    pub include_spectators: bool,
    pub include_safe_zones: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub freq: Freq,
    pub is_spectator: bool,
    pub in_safe_zone: bool,
}

pub struct PeriodicOutcome {
    pub items: Vec<PeriodicRewardItem>,
    pub packets: Vec<Vec<u8>>,
    /// `FlagPoints` increments to apply; spectators and safe-zone players never appear here
    /// even though they may count toward `total_player_count` in the reward formula.
    pub player_increments: Vec<(PlayerId, i32)>,
}

fn freq_reward(flag_count: u32, total_player_count: u32, config: &PeriodicConfig) -> i32 {
    if config.reward_points > 0 {
        flag_count as i32 * config.reward_points
    } else {
        (flag_count as i64 * config.reward_points.unsigned_abs() as i64 * total_player_count as i64) as i32
    }
}

fn per_player_share(freq_reward: i32, team_size: u32, config: &PeriodicConfig) -> i32 {
    if config.split_points && team_size > 0 {
        freq_reward / team_size as i32
    } else {
        freq_reward
    }
}

fn is_eligible(is_spectator: bool, in_safe_zone: bool, config: &PeriodicConfig) -> bool {
    if is_spectator && !config.include_spectators {
        return false;
    }
    if in_safe_zone && !config.include_safe_zones {
        return false;
    }
    true
}

/// Computes the full reward for one firing: the wire items, their fragmented packets, and
/// the `FlagPoints` increment owed to each eligible player.
pub fn compute(players: &[PlayerSnapshot], config: &PeriodicConfig, flag_count_per_freq: impl Fn(Freq) -> u32) -> PeriodicOutcome {
    let total_player_count = players.len() as u32;

    let mut freqs: Vec<Freq> = players.iter().map(|p| p.freq).collect();
    freqs.sort_by_key(|f| f.0);
    freqs.dedup();

    let mut items = Vec::new();
    let mut player_increments = Vec::new();

    for freq in freqs {
        let flag_count = flag_count_per_freq(freq);
        if flag_count == 0 {
            continue;
        }
        let reward = freq_reward(flag_count, total_player_count, config);
        if reward == 0 {
            continue;
        }
        items.push(PeriodicRewardItem {
            freq,
            points: reward.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        });

        let team: Vec<&PlayerSnapshot> = players.iter().filter(|p| p.freq == freq).collect();
        let team_size = team.len() as u32;
        let share = per_player_share(reward, team_size, config);
        for player in team {
            if is_eligible(player.is_spectator, player.in_safe_zone, config) {
                player_increments.push((player.player_id, share));
            }
        }
    }

    let packets = PeriodicReward::fragment(&items);
    PeriodicOutcome { items, packets, player_increments }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleState {
    Stopped,
    Running,
}

/// Tracks the recurring `Periodic:RewardDelay` countdown and exposes the `?periodicreward` /
/// `?periodicreset` / `?periodicstop` command surface on top of [`compute`]'s pure reward math.
pub struct PeriodicSchedule {
    pub state: ScheduleState,
    elapsed: common_util::ticks::Ticks,
}

impl PeriodicSchedule {
    pub fn new() -> Self {
        Self {
            state: ScheduleState::Running,
            elapsed: common_util::ticks::Ticks::ZERO,
        }
    }

    /// Advances one tick. Returns `true` when `config.reward_delay` has elapsed; the caller
    /// fires the reward via [`compute`] and then calls [`Self::reset_timer`].
    pub fn tick(&mut self, config: &PeriodicConfig) -> bool {
        if self.state != ScheduleState::Running {
            return false;
        }
        self.elapsed = self.elapsed.next();
        self.elapsed >= config.reward_delay
    }

    pub fn reset_timer(&mut self) {
        self.elapsed = common_util::ticks::Ticks::ZERO;
    }

    /// `?periodicreward`: the caller fires the reward immediately; this only restarts the
    /// countdown so the next automatic firing is a full `reward_delay` away.
    pub fn force_fire(&mut self) {
        self.reset_timer();
    }

    /// `?periodicreset`: restarts the countdown without firing a reward.
    pub fn reset(&mut self) {
        self.reset_timer();
    }

    /// `?periodicstop`: halts automatic firing until [`Self::resume`].
    pub fn stop(&mut self) {
        self.state = ScheduleState::Stopped;
        self.elapsed = common_util::ticks::Ticks::ZERO;
    }

    pub fn resume(&mut self) {
        self.state = ScheduleState::Running;
        self.elapsed = common_util::ticks::Ticks::ZERO;
    }
}

impl Default for PeriodicSchedule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn pid(n: u32) -> PlayerId {
        PlayerId(NonZeroU32::new(n).unwrap())
    }

    fn base_config() -> PeriodicConfig {
        PeriodicConfig {
            reward_delay: common_util::ticks::Ticks(3000),
            reward_points: 10,
            split_points: false,
            include_spectators: false,
            include_safe_zones: false,
        }
    }

    #[test]
    fn spectators_and_safe_zone_players_excluded_from_increments() {
        let players = vec![
            PlayerSnapshot { player_id: pid(1), freq: Freq(0), is_spectator: false, in_safe_zone: false },
            PlayerSnapshot { player_id: pid(2), freq: Freq(0), is_spectator: true, in_safe_zone: false },
            PlayerSnapshot { player_id: pid(3), freq: Freq(0), is_spectator: false, in_safe_zone: true },
        ];
        let outcome = compute(&players, &base_config(), |_| 2);
        assert_eq!(outcome.player_increments, vec![(pid(1), 20)]);
    }

    #[test]
    fn split_points_divides_by_team_size() {
        let players = vec![
            PlayerSnapshot { player_id: pid(1), freq: Freq(0), is_spectator: false, in_safe_zone: false },
            PlayerSnapshot { player_id: pid(2), freq: Freq(0), is_spectator: false, in_safe_zone: false },
        ];
        let mut config = base_config();
        config.split_points = true;
        let outcome = compute(&players, &config, |_| 1);
        assert_eq!(outcome.player_increments, vec![(pid(1), 5), (pid(2), 5)]);
    }

    #[test]
    fn negative_reward_points_scales_by_total_player_count() {
        let players = vec![PlayerSnapshot { player_id: pid(1), freq: Freq(0), is_spectator: false, in_safe_zone: false }];
        let mut config = base_config();
        config.reward_points = -2;
        // flagCount(3) * |reward|(2) * totalPlayers(1) = 6
        let outcome = compute(&players, &config, |_| 3);
        assert_eq!(outcome.items[0].points, 6);
    }

    #[test]
    fn schedule_fires_after_reward_delay_ticks_elapse() {
        let config = base_config();
        let mut schedule = PeriodicSchedule::new();
        for _ in 0..(config.reward_delay.0 - 1) {
            assert!(!schedule.tick(&config));
        }
        assert!(schedule.tick(&config));
    }

    #[test]
    fn stopped_schedule_never_fires_until_resumed() {
        let config = base_config();
        let mut schedule = PeriodicSchedule::new();
        schedule.stop();
        for _ in 0..config.reward_delay.0 {
            assert!(!schedule.tick(&config));
        }
        schedule.resume();
        for _ in 0..(config.reward_delay.0 - 1) {
            assert!(!schedule.tick(&config));
        }
        assert!(schedule.tick(&config));
    }

    #[test]
    fn fragments_across_multiple_packets_when_payload_exceeds_cap() {
        let players: Vec<PlayerSnapshot> = (0..200)
            .map(|i| PlayerSnapshot {
                player_id: pid(i + 1),
                freq: Freq(i as i16),
                is_spectator: false,
                in_safe_zone: false,
            })
            .collect();
        let outcome = compute(&players, &base_config(), |_| 1);
        assert_eq!(outcome.items.len(), 200);
        assert!(outcome.packets.len() > 1);
        let expected_sum: i64 = outcome.items.iter().map(|i| i.points as i64).sum();
        let packet_sum: i64 = outcome
            .packets
            .iter()
            .flat_map(|packet| packet[1..].chunks_exact(4))
            .map(|chunk| i16::from_le_bytes([chunk[2], chunk[3]]) as i64)
            .sum();
        assert_eq!(expected_sum, packet_sum);
    }
}
