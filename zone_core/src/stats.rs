// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-player stats/scoring (§4.11): multi-interval, multi-scope counters and timers, the
//! score-update broadcast, and the persistence hand-off.

use crate::arena::ArenaManager;
use core_protocol::id::{Freq, PersistInterval, PersistScope, PlayerId, StatCode};
use core_protocol::name::ArenaName;
use core_protocol::wire::ScoreUpdate;
use core_protocol::UnixTime;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// One stored stat. A duration stat accumulates `elapsed` plus, while a timer is running,
/// the time since `running_since`.
#[derive(Copy, Clone, Debug)]
pub enum StatValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Timestamp(UnixTime),
    Duration {
        elapsed: Duration,
        running_since: Option<Instant>,
    },
}

impl StatValue {
    /// Legacy records stored `KillPoints`/`FlagPoints` as `u64`; promote on read by
    /// truncating/extending into whatever variant the caller actually asked for.
    pub fn as_i64(self) -> i64 {
        match self {
            StatValue::I32(v) => v as i64,
            StatValue::U32(v) => v as i64,
            StatValue::I64(v) => v,
            StatValue::U64(v) => v as i64,
            StatValue::Timestamp(t) => t as i64,
            StatValue::Duration { elapsed, .. } => elapsed.as_millis() as i64,
        }
    }

    fn as_i32(self) -> i32 {
        self.as_i64() as i32
    }
}

type Table = HashMap<StatCode, StatValue>;

/// The four fields the client's scoreboard mirrors, and which drive [`PlayerStats::dirty`].
const SCORE_FIELDS: [StatCode; 4] = [
    core_protocol::id::stat_code::KILL_POINTS,
    core_protocol::id::stat_code::FLAG_POINTS,
    core_protocol::id::stat_code::KILLS,
    core_protocol::id::stat_code::DEATHS,
];

struct Inner {
    tables: HashMap<(PersistScope, PersistInterval), Table>,
    /// Score fields changed since the last [`StatsStore::send_updates`] observed them.
    dirty: HashSet<StatCode>,
}

/// Guards one player's stat tables. Network emission happens outside the lock (§5).
pub struct PlayerStats {
    inner: std::sync::Mutex<Inner>,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                tables: HashMap::new(),
                dirty: HashSet::new(),
            }),
        }
    }
}

impl PlayerStats {
    fn mark_dirty_if_score_field(dirty: &mut HashSet<StatCode>, code: StatCode) {
        if SCORE_FIELDS.contains(&code) {
            dirty.insert(code);
        }
    }

    pub fn increment(&self, scope: PersistScope, interval: PersistInterval, code: StatCode, amount: i64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .tables
            .entry((scope, interval))
            .or_default()
            .entry(code)
            .or_insert(StatValue::I32(0));
        *entry = match *entry {
            StatValue::I32(v) => StatValue::I32(v + amount as i32),
            StatValue::U32(v) => StatValue::U32((v as i64 + amount) as u32),
            StatValue::I64(v) => StatValue::I64(v + amount),
            StatValue::U64(v) => StatValue::U64((v as i64 + amount) as u64),
            other => other,
        };
        Self::mark_dirty_if_score_field(&mut inner.dirty, code);
    }

    pub fn set(&self, scope: PersistScope, interval: PersistInterval, code: StatCode, value: StatValue) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry((scope, interval)).or_default().insert(code, value);
        Self::mark_dirty_if_score_field(&mut inner.dirty, code);
    }

    pub fn try_get(&self, scope: PersistScope, interval: PersistInterval, code: StatCode) -> Option<StatValue> {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(&(scope, interval)).and_then(|t| t.get(&code)).copied()
    }

    pub fn try_get_i32(&self, scope: PersistScope, interval: PersistInterval, code: StatCode) -> Option<i32> {
        self.try_get(scope, interval, code).map(StatValue::as_i32)
    }

    pub fn start_timer(&self, scope: PersistScope, interval: PersistInterval, code: StatCode, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .tables
            .entry((scope, interval))
            .or_default()
            .entry(code)
            .or_insert(StatValue::Duration {
                elapsed: Duration::ZERO,
                running_since: None,
            });
        if let StatValue::Duration { running_since, .. } = entry {
            if running_since.is_none() {
                *running_since = Some(now);
            }
        }
    }

    pub fn stop_timer(&self, scope: PersistScope, interval: PersistInterval, code: StatCode, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(StatValue::Duration { elapsed, running_since }) =
            inner.tables.entry((scope, interval)).or_default().get_mut(&code)
        {
            if let Some(since) = running_since.take() {
                *elapsed += now.saturating_duration_since(since);
            }
        }
    }

    pub fn reset_timer(&self, scope: PersistScope, interval: PersistInterval, code: StatCode) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry((scope, interval)).or_default().insert(
            code,
            StatValue::Duration {
                elapsed: Duration::ZERO,
                running_since: None,
            },
        );
    }

    /// Zeroes `Reset`-interval kill/flag points and kill/death counts for this player. Other
    /// timers (e.g. `ArenaTotalTime`) keep running as-of now and are left untouched.
    fn score_reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(table) = inner.tables.get_mut(&(PersistScope::PerArena, PersistInterval::Reset)) {
            for code in SCORE_FIELDS {
                table.insert(code, StatValue::I32(0));
            }
        }
        for code in SCORE_FIELDS {
            inner.dirty.insert(code);
        }
    }

    /// Drops every stat in `(PerArena, interval)`, e.g. ending the `Game` interval at the
    /// close of a KOTH/flag/speed game so the next game's tally starts from zero. Unlike
    /// [`Self::score_reset`] this clears the whole table, not just the scoreboard-mirrored
    /// fields, and marks any scoreboard field it touches dirty.
    fn end_interval(&self, interval: PersistInterval) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(table) = inner.tables.remove(&(PersistScope::PerArena, interval)) {
            for code in table.keys() {
                Self::mark_dirty_if_score_field(&mut inner.dirty, *code);
            }
        }
    }

    fn snapshot_score_fields(&self) -> [i64; 4] {
        let inner = self.inner.lock().unwrap();
        let table = inner.tables.get(&(PersistScope::PerArena, PersistInterval::Reset));
        SCORE_FIELDS.map(|code| {
            table
                .and_then(|t| t.get(&code))
                .map(|v| v.as_i64())
                .unwrap_or(0)
        })
    }

    fn take_dirty(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirty.is_empty() {
            false
        } else {
            inner.dirty.clear();
            true
        }
    }
}

/// Process-wide stats table, keyed by player. The arena manager's roster decides which
/// players a `SendUpdates(arena, ...)` call visits; this store itself is arena-agnostic.
#[derive(Default)]
pub struct StatsStore {
    players: std::sync::RwLock<HashMap<PlayerId, std::sync::Arc<PlayerStats>>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats_for(&self, player_id: PlayerId) -> std::sync::Arc<PlayerStats> {
        if let Some(existing) = self.players.read().unwrap().get(&player_id) {
            return std::sync::Arc::clone(existing);
        }
        let mut writer = self.players.write().unwrap();
        std::sync::Arc::clone(
            writer
                .entry(player_id)
                .or_insert_with(|| std::sync::Arc::new(PlayerStats::default())),
        )
    }

    pub fn remove(&self, player_id: PlayerId) {
        self.players.write().unwrap().remove(&player_id);
    }

    /// `ScoreReset(player, Reset)`: zeroes the player's score fields and returns the one
    /// `0x1A` packet the caller must emit.
    pub fn score_reset_player(&self, player_id: PlayerId) {
        if let Some(stats) = self.players.read().unwrap().get(&player_id) {
            stats.score_reset();
        }
    }

    /// `ScoreReset(arena, Reset)`: resets every player in `roster`.
    pub fn score_reset_players(&self, roster: impl IntoIterator<Item = PlayerId>) {
        let reader = self.players.read().unwrap();
        for player_id in roster {
            if let Some(stats) = reader.get(&player_id) {
                stats.score_reset();
            }
        }
    }

    /// Ends `(PerArena, interval)` for one player, e.g. `Game` at the close of a round.
    pub fn end_interval_player(&self, player_id: PlayerId, interval: PersistInterval) {
        if let Some(stats) = self.players.read().unwrap().get(&player_id) {
            stats.end_interval(interval);
        }
    }

    /// Ends `(PerArena, interval)` for every player in `roster`.
    pub fn end_interval_players(&self, roster: impl IntoIterator<Item = PlayerId>, interval: PersistInterval) {
        let reader = self.players.read().unwrap();
        for player_id in roster {
            if let Some(stats) = reader.get(&player_id) {
                stats.end_interval(interval);
            }
        }
    }

    /// For each player in `roster` whose score fields changed since the last call, builds a
    /// [`ScoreUpdate`] and clears that player's dirty flag. Calling this twice with no
    /// intervening mutation yields an empty vector the second time (§8 idempotence).
    pub fn send_updates(&self, roster: impl IntoIterator<Item = PlayerId>) -> Vec<ScoreUpdate> {
        let reader = self.players.read().unwrap();
        let mut updates = Vec::new();
        for player_id in roster {
            let Some(stats) = reader.get(&player_id) else { continue };
            if !stats.take_dirty() {
                continue;
            }
            let [kill_points, flag_points, kills, deaths] = stats.snapshot_score_fields();
            updates.push(ScoreUpdate {
                player_id: player_id.0.get() as i16,
                kill_points: kill_points as i32,
                flag_points: flag_points as i32,
                kills: kills as u16,
                deaths: deaths as u16,
            });
        }
        updates
    }
}

/// Drives interval-end notifications from the [`crate::persist`] bridge into per-arena score
/// resets. The persist store tells us an interval ended for an arena group; every matching
/// arena broadcasts a reset to its own roster.
pub fn on_interval_ended(
    arenas: &ArenaManager,
    stats: &StatsStore,
    roster_of: impl Fn(ArenaName) -> Vec<PlayerId>,
    interval: PersistInterval,
) {
    if interval != PersistInterval::Reset {
        return;
    }
    for name in arenas.names() {
        let roster = roster_of(name);
        stats.score_reset_players(roster);
    }
}

/// Index into a fixed 8-wide team-score array (§3).
pub fn team_score_index(freq: Freq) -> usize {
    freq.score_index()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_protocol::id::stat_code;

    fn pid(n: u32) -> PlayerId {
        PlayerId(std::num::NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn send_updates_is_idempotent_with_no_mutation() {
        let store = StatsStore::new();
        let player = pid(1);
        store.stats_for(player);
        store
            .stats_for(player)
            .increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::KILLS, 1);

        let first = store.send_updates([player]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kills, 1);

        let second = store.send_updates([player]);
        assert!(second.is_empty());
    }

    #[test]
    fn score_reset_zeroes_reset_interval_fields() {
        let store = StatsStore::new();
        let player = pid(2);
        let stats = store.stats_for(player);
        stats.increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::KILL_POINTS, 50);
        stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::ARENA_TOTAL_TIME, 10);

        store.score_reset_player(player);

        assert_eq!(
            stats.try_get_i32(PersistScope::PerArena, PersistInterval::Reset, stat_code::KILL_POINTS),
            Some(0)
        );
        assert_eq!(
            stats.try_get_i32(PersistScope::PerArena, PersistInterval::Forever, stat_code::ARENA_TOTAL_TIME),
            Some(10)
        );
    }

    #[test]
    fn non_score_field_increment_does_not_mark_dirty() {
        let store = StatsStore::new();
        let player = pid(3);
        store
            .stats_for(player)
            .increment(PersistScope::Global, PersistInterval::Forever, stat_code::LAST_SEEN, 1);
        assert!(store.send_updates([player]).is_empty());
    }

    #[test]
    fn end_interval_drops_whole_table_and_marks_score_fields_dirty() {
        let store = StatsStore::new();
        let player = pid(4);
        let stats = store.stats_for(player);
        stats.increment(PersistScope::PerArena, PersistInterval::Game, stat_code::KILL_POINTS, 50);
        stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::KILL_POINTS, 50);
        store.send_updates([player]);

        store.end_interval_player(player, PersistInterval::Game);

        assert_eq!(
            stats.try_get_i32(PersistScope::PerArena, PersistInterval::Game, stat_code::KILL_POINTS),
            None
        );
        assert_eq!(
            stats.try_get_i32(PersistScope::PerArena, PersistInterval::Forever, stat_code::KILL_POINTS),
            Some(50)
        );
        let updates = store.send_updates([player]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kill_points, 50);
    }

    #[test]
    fn duration_timer_accumulates_elapsed() {
        let stats = PlayerStats::default();
        let t0 = Instant::now();
        stats.start_timer(PersistScope::PerArena, PersistInterval::Forever, stat_code::ARENA_TOTAL_TIME, t0);
        let t1 = t0 + Duration::from_secs(5);
        stats.stop_timer(PersistScope::PerArena, PersistInterval::Forever, stat_code::ARENA_TOTAL_TIME, t1);
        if let Some(StatValue::Duration { elapsed, .. }) =
            stats.try_get(PersistScope::PerArena, PersistInterval::Forever, stat_code::ARENA_TOTAL_TIME)
        {
            assert_eq!(elapsed, Duration::from_secs(5));
        } else {
            panic!("expected a duration stat");
        }
    }
}
