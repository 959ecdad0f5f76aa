// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Speed game (§4.9): a timed deathmatch with an incrementally-maintained rank list and a
//! per-player personal-result summary at game end.

use core_protocol::id::PlayerId;
use core_protocol::wire::SpeedStats;
use server_util::notify_set::NotifySet;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpeedPhase {
    Stopped,
    Starting,
    Running,
}

pub struct SpeedGameConfig {
    pub auto_start: bool,
    pub min_players: u32,
    pub start_delay: Duration,
    pub game_duration: Duration,
}

#[derive(Copy, Clone, Debug)]
struct RankEntry {
    player_id: PlayerId,
    kill_points: i32,
}

/// An ordered sequence of players sorted by `KillPoints` descending; each player appears at
/// most once (§3). [`NotifySet`] tracks membership churn so a caller can diff the visible
/// top-N between broadcasts without rescanning the whole list.
pub struct RankList {
    entries: Vec<RankEntry>,
    pub changed: NotifySet<PlayerId>,
}

impl RankList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            changed: NotifySet::new(),
        }
    }

    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            self.changed.removed(entry.player_id);
        }
    }

    /// Inserts or moves `player_id` based on `kill_points`, keeping descending order.
    pub fn update(&mut self, player_id: PlayerId, kill_points: i32) {
        match self.entries.iter().position(|e| e.player_id == player_id) {
            Some(pos) => self.entries[pos].kill_points = kill_points,
            None => {
                self.entries.push(RankEntry { player_id, kill_points });
                self.changed.added(player_id);
            }
        }
        self.entries.sort_by(|a, b| b.kill_points.cmp(&a.kill_points));
    }

    pub fn top(&self, n: usize) -> Vec<(PlayerId, i32)> {
        self.entries.iter().take(n).map(|e| (e.player_id, e.kill_points)).collect()
    }

    pub fn rank_of(&self, player_id: PlayerId) -> Option<u16> {
        self.entries.iter().position(|e| e.player_id == player_id).map(|i| (i + 1) as u16)
    }

    pub fn points_of(&self, player_id: PlayerId) -> i32 {
        self.entries.iter().find(|e| e.player_id == player_id).map(|e| e.kill_points).unwrap_or(0)
    }
}

impl Default for RankList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpeedGame {
    pub phase: SpeedPhase,
    pub start_after: Option<Instant>,
    pub started_at: Option<Instant>,
    pub rank: RankList,
}

impl SpeedGame {
    pub fn new(config: &SpeedGameConfig) -> Self {
        Self {
            phase: if config.auto_start { SpeedPhase::Starting } else { SpeedPhase::Stopped },
            start_after: None,
            started_at: None,
            rank: RankList::new(),
        }
    }

    /// Mirrors the KOTH countdown: clears when the in-ship quorum drops, else counts down to
    /// `start_delay` before beginning a round.
    pub fn tick_countdown(&mut self, now: Instant, in_ship_count: u32, config: &SpeedGameConfig) -> bool {
        debug_assert_eq!(self.phase, SpeedPhase::Starting);
        if in_ship_count < config.min_players {
            self.start_after = None;
            return false;
        }
        match self.start_after {
            None => {
                self.start_after = Some(now + config.start_delay);
                false
            }
            Some(at) if now >= at => {
                self.begin_round(now);
                true
            }
            Some(_) => false,
        }
    }

    /// Warps/resets ships and clears the rank list. Resetting the `Game` persist interval is
    /// the caller's job (an async continuation that must resume on the mainloop, per §9).
    pub fn begin_round(&mut self, now: Instant) {
        self.phase = SpeedPhase::Running;
        self.start_after = None;
        self.started_at = Some(now);
        self.rank.clear();
    }

    pub fn is_round_over(&self, now: Instant, config: &SpeedGameConfig) -> bool {
        self.started_at
            .map(|start| now.saturating_duration_since(start) >= config.game_duration)
            .unwrap_or(false)
    }

    /// Call on every kill. `current_kill_points` is the killer's `KillPoints` in the `Game`
    /// interval after the kill-reward increment has already been applied.
    pub fn on_kill(&mut self, killer: PlayerId, current_kill_points: i32) {
        if self.phase == SpeedPhase::Running {
            self.rank.update(killer, current_kill_points);
        }
    }

    /// Builds the end-of-round summary for `player_id`. `prior_best` is the player's
    /// `Forever`-interval personal best; the returned value is the (possibly unchanged) new
    /// best for the caller to persist.
    pub fn end_round_stats(&self, player_id: PlayerId, prior_best: i32) -> (SpeedStats, i32) {
        let points = self.rank.points_of(player_id);
        let new_best = prior_best.max(points);
        let mut top5 = arrayvec::ArrayVec::new();
        for entry in self.rank.top(5) {
            let _ = top5.try_push(entry);
        }
        (
            SpeedStats {
                top5,
                personal_rank: self.rank.rank_of(player_id),
                personal_points: points,
                personal_best: new_best,
            },
            new_best,
        )
    }

    pub fn end_round(&mut self, config: &SpeedGameConfig) {
        self.phase = if config.auto_start { SpeedPhase::Starting } else { SpeedPhase::Stopped };
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn pid(n: u32) -> PlayerId {
        PlayerId(NonZeroU32::new(n).unwrap())
    }

    fn config() -> SpeedGameConfig {
        SpeedGameConfig {
            auto_start: false,
            min_players: 1,
            start_delay: Duration::from_secs(5),
            game_duration: Duration::from_secs(300),
        }
    }

    #[test]
    fn rank_list_stays_sorted_and_deduplicated() {
        let mut rank = RankList::new();
        rank.update(pid(1), 3);
        rank.update(pid(2), 5);
        rank.update(pid(1), 7);
        assert_eq!(rank.top(2), vec![(pid(1), 7), (pid(2), 5)]);
    }

    #[test]
    fn round_over_after_duration_elapses() {
        let config = config();
        let mut game = SpeedGame::new(&config);
        let now = Instant::now();
        game.begin_round(now);
        assert!(!game.is_round_over(now + Duration::from_secs(299), &config));
        assert!(game.is_round_over(now + Duration::from_secs(300), &config));
    }

    #[test]
    fn end_round_stats_reports_improved_personal_best() {
        let config = config();
        let mut game = SpeedGame::new(&config);
        game.begin_round(Instant::now());
        game.on_kill(pid(1), 10);

        let (stats, best) = game.end_round_stats(pid(1), 4);
        assert_eq!(stats.personal_points, 10);
        assert_eq!(stats.personal_rank, Some(1));
        assert_eq!(best, 10);
    }

    #[test]
    fn clear_marks_every_entry_removed_in_changed_set() {
        let mut rank = RankList::new();
        rank.update(pid(1), 1);
        rank.update(pid(2), 2);
        rank.changed.add.clear();
        rank.clear();
        assert!(rank.changed.remove.contains(&pid(1)));
        assert!(rank.changed.remove.contains(&pid(2)));
    }
}
