// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Concrete [`ArenaModule`]s wiring the pure rules logic in [`crate::ball`], [`crate::flag`],
//! [`crate::koth`], [`crate::speed`], and [`crate::periodic`] into the broker/arena/timer
//! fabric. Each module allocates its own [`SlotKey`] at construction and stores its live game
//! state on the attached arena rather than in the module itself, so one module instance can be
//! shared (and attached) across every arena.
//!
//! Ball and flag events are driven externally (a goal, a pickup, a claim) and so are exposed as
//! plain methods the caller invokes with an [`ArenaHandle`]. KOTH, the speed game, and the
//! periodic reward are time-driven: they register an [`ArenaTick`] handler during `on_attach`
//! and need no external driver beyond the mainloop. KOTH and the speed game additionally
//! subscribe to [`OnKill`], fired by the (external) kill-resolution code for every kill.

use crate::arena::{Arena, ArenaHandle, ArenaModule, ModuleName};
use crate::ball::{self, BallGame, SoccerConfig, SoccerMode, TeamScores};
use crate::broker::RegistrationToken;
use crate::config::ConfigStore;
use crate::flag::{self, FlagGame, FlagMode, FlagSlot, MusicCue};
use crate::jackpot::JackpotRegistry;
use crate::koth::{self, Koth, KothConfig, KothPhase, KothPlayerState};
use crate::mainloop::ArenaTick;
use crate::periodic::{self, PeriodicConfig, PeriodicSchedule, PlayerSnapshot};
use crate::player::PlayerRegistry;
use crate::slot::{ArenaSlotKind, SlotAllocator, SlotKey};
use crate::speed::{SpeedGame, SpeedGameConfig, SpeedPhase};
use crate::stats::{StatValue, StatsStore};
use core_protocol::id::{stat_code, Freq, PersistInterval, PersistScope, PlayerId, StatCode};
use core_protocol::name::ArenaName;
use core_protocol::wire::Goal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Fired by the (external) kill-resolution code for every kill: killer and killer's bounty,
/// killed and killed's bounty, and whether the two were on the same freq. The killer's bounty
/// feeds KOTH's `non_crown_minimum_bounty` gate; the killed player's bounty is what the
/// jackpot bleeds from. KOTH and the speed game each subscribe independently; neither knows
/// about the other.
pub type OnKill = dyn Fn(&mut Arena, PlayerId, u16, PlayerId, u16, bool) + Send + Sync;

/// Fired when a KOTH countdown expires and crowns are handed out: the participants crowned.
pub type KothStarted = dyn Fn(&mut Arena, &[PlayerId]) + Send + Sync;

/// Fired when a KOTH game is won: the winners and the per-winner reward.
pub type KothWon = dyn Fn(&mut Arena, &[PlayerId], i32) + Send + Sync;

/// One allocator shared by every rules module in this file. Index uniqueness across distinct
/// `T`s is all [`SlotAllocator::allocate`] guarantees, which is all a shared [`SlotMap`] needs.
static ARENA_SLOTS: SlotAllocator<ArenaSlotKind> = SlotAllocator::new();

fn in_ship_roster(players: &PlayerRegistry, arena: ArenaName) -> Vec<PlayerId> {
    players
        .lock()
        .values()
        .filter_map(|handle| {
            let player = handle.lock().unwrap();
            (player.arena == Some(arena) && !player.ship.is_spectator()).then_some(player.player_id)
        })
        .collect()
}

// ---------------------------------------------------------------------------------------------
// Ball game
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
struct BallModuleState {
    game: Option<BallGame>,
}

fn soccer_config(config: &dyn ConfigStore, arena: ArenaName) -> SoccerConfig {
    SoccerConfig {
        mode: match config.get_i32(arena, "Soccer:Mode", 0) {
            1 => SoccerMode::LeftRight,
            2 => SoccerMode::TopBottom,
            3 => SoccerMode::FourTeamQuadrant,
            4 => SoccerMode::FourTeamSide,
            _ => SoccerMode::None,
        },
        capture_points: config.get_i32(arena, "Soccer:CapturePoints", -1),
        reward: config.get_i32(arena, "Soccer:Reward", 0),
        win_by: config.get_i32(arena, "Soccer:WinBy", 0),
        min_players: config.get_i32(arena, "Soccer:MinPlayers", 0).max(0) as u32,
        min_teams: config.get_i32(arena, "Soccer:MinTeams", 0).max(0) as u32,
        custom_game: config.get_bool(arena, "Soccer:CustomGame", false),
    }
}

/// Soccer/ball-game rules (§4.6) wired to a live arena.
pub struct BallGameModule {
    config: Arc<dyn ConfigStore>,
    stats: Arc<StatsStore>,
    players: Arc<PlayerRegistry>,
    slot: SlotKey<ArenaSlotKind, BallModuleState>,
}

impl BallGameModule {
    pub fn new(config: Arc<dyn ConfigStore>, stats: Arc<StatsStore>, players: Arc<PlayerRegistry>) -> Self {
        Self {
            config,
            stats,
            players,
            slot: ARENA_SLOTS.allocate(),
        }
    }

    /// Called by the (external) ball-carrier code when `scorer` scores a goal. Returns the
    /// reward paid out to the scorer, `0` for a non-winning or null goal.
    pub fn on_goal(&self, arena_handle: &ArenaHandle, scorer: PlayerId, scorer_freq: Freq, owner_freq: Option<Freq>) -> i32 {
        let mut arena = arena_handle.lock().unwrap();
        let cfg = soccer_config(self.config.as_ref(), arena.name);

        let (is_null, win) = {
            let state = arena.slots.get(self.slot);
            let game = state.game.get_or_insert_with(|| BallGame::reset(&cfg));
            let outcome = game.on_goal(&cfg, scorer_freq, owner_freq);
            let win = if outcome.is_null { None } else { game.check_win(&cfg) };
            (outcome.is_null, win)
        };
        if is_null {
            return 0;
        }

        let mut reward = 0;
        if win.is_some() {
            let scorer_in_safe_zone = self
                .players
                .get(scorer)
                .map(|p| p.lock().unwrap().position.in_safe_zone)
                .unwrap_or(false);
            reward = ball::reward_points(&cfg, arena.player_count as u32, cfg.mode.team_count() as u32, scorer_in_safe_zone);
            if reward != 0 {
                self.credit_flag_points(scorer, reward);
            }
            arena.slots.get(self.slot).game = Some(BallGame::reset(&cfg));
        }

        arena.push_outbound(Goal { scoring_freq: scorer_freq, points: reward }.encode().to_vec());
        reward
    }

    fn credit_flag_points(&self, player_id: PlayerId, amount: i32) {
        let stats = self.stats.stats_for(player_id);
        stats.increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::FLAG_POINTS, amount as i64);
        stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::FLAG_POINTS, amount as i64);
    }

    /// `?score`.
    pub fn score_line(&self, arena_handle: &ArenaHandle) -> String {
        let mut arena = arena_handle.lock().unwrap();
        let cfg = soccer_config(self.config.as_ref(), arena.name);
        let state = arena.slots.get(self.slot);
        let game = state.game.get_or_insert_with(|| BallGame::reset(&cfg));
        game.scores.format_line(cfg.mode.team_count())
    }

    /// `?setscore a b c ...`.
    pub fn set_score(&self, arena_handle: &ArenaHandle, scores: [i32; 8]) {
        let mut arena = arena_handle.lock().unwrap();
        let cfg = soccer_config(self.config.as_ref(), arena.name);
        let state = arena.slots.get(self.slot);
        let game = state.game.get_or_insert_with(|| BallGame::reset(&cfg));
        game.scores = TeamScores(scores);
    }

    /// `?resetgame`.
    pub fn reset_game(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        let cfg = soccer_config(self.config.as_ref(), arena.name);
        arena.slots.get(self.slot).game = Some(BallGame::reset(&cfg));
    }
}

impl ArenaModule for BallGameModule {
    fn name(&self) -> ModuleName {
        "ball"
    }

    fn on_attach(&self, arena: &mut Arena) -> bool {
        let cfg = soccer_config(self.config.as_ref(), arena.name);
        arena.slots.get(self.slot).game = Some(BallGame::reset(&cfg));
        true
    }

    fn on_detach(&self, arena: &mut Arena) {
        arena.slots.get(self.slot).game = None;
    }
}

// ---------------------------------------------------------------------------------------------
// Flag game
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
pub struct FlagModuleState {
    game: Option<FlagGame>,
}

fn flag_rules_config(config: &dyn ConfigStore, arena: ArenaName) -> (i32, bool) {
    (
        config.get_i32(arena, "Flag:FlagReward", 0),
        config.get_bool(arena, "Flag:SplitPoints", false),
    )
}

/// Flag-game rules (§4.7) wired to a live arena. Flag positions come from the (external) map
/// data collaborator; this module only knows the flag count and starting mode, and places new
/// flags at `(0, 0)` until the network layer relocates them.
pub struct FlagGameModule {
    config: Arc<dyn ConfigStore>,
    stats: Arc<StatsStore>,
    players: Arc<PlayerRegistry>,
    jackpots: Arc<JackpotRegistry>,
    mode: FlagMode,
    flag_count: usize,
    slot: SlotKey<ArenaSlotKind, FlagModuleState>,
}

impl FlagGameModule {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        stats: Arc<StatsStore>,
        players: Arc<PlayerRegistry>,
        jackpots: Arc<JackpotRegistry>,
        mode: FlagMode,
        flag_count: usize,
    ) -> Self {
        Self {
            config,
            stats,
            players,
            jackpots,
            mode,
            flag_count,
            slot: ARENA_SLOTS.allocate(),
        }
    }

    pub fn slot(&self) -> SlotKey<ArenaSlotKind, FlagModuleState> {
        self.slot
    }

    /// Carry-all pickup.
    pub fn pickup(&self, arena_handle: &ArenaHandle, flag_id: usize, carrier: PlayerId, carrier_freq: Freq) -> Option<Freq> {
        let mut arena = arena_handle.lock().unwrap();
        let winner = {
            let state = arena.slots.get(self.slot);
            let game = state.game.as_mut()?;
            game.on_pickup(flag_id, carrier, carrier_freq, Instant::now())
        };
        if let Some(winner_freq) = winner {
            self.apply_win_reward(&mut arena, winner_freq);
        }
        winner
    }

    /// A carried flag reverts, e.g. because its carrier was killed.
    pub fn drop_flag(&self, arena_handle: &ArenaHandle, flag_id: usize, x: i16, y: i16) -> Option<MusicCue> {
        let mut arena = arena_handle.lock().unwrap();
        let state = arena.slots.get(self.slot);
        let game = state.game.as_mut()?;
        game.on_drop(flag_id, x, y, Instant::now())
    }

    /// Own-all-dropped claim.
    pub fn claim(&self, arena_handle: &ArenaHandle, flag_id: usize, owner_freq: Freq) -> (Option<Freq>, Option<MusicCue>) {
        let mut arena = arena_handle.lock().unwrap();
        let (winner, cue) = {
            let state = arena.slots.get(self.slot);
            let Some(game) = state.game.as_mut() else { return (None, None) };
            game.on_claim(flag_id, owner_freq, Instant::now())
        };
        if let Some(winner_freq) = winner {
            self.apply_win_reward(&mut arena, winner_freq);
        }
        (winner, cue)
    }

    fn apply_win_reward(&self, arena: &mut Arena, winner_freq: Freq) {
        let (flag_reward, split_points) = flag_rules_config(self.config.as_ref(), arena.name);
        let jackpot = self.jackpots.jackpot_for(arena.name);
        let jackpot_value = jackpot.get();
        let team: Vec<PlayerId> = self
            .players
            .lock()
            .values()
            .filter_map(|p| {
                let p = p.lock().unwrap();
                (p.arena == Some(arena.name) && p.freq == winner_freq).then_some(p.player_id)
            })
            .collect();
        let reward = flag::reward_points(flag_reward, arena.player_count as u32, jackpot_value, split_points, team.len() as u32);
        jackpot.reset();
        if reward != 0 {
            for player_id in &team {
                let stats = self.stats.stats_for(*player_id);
                stats.increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::FLAG_POINTS, reward as i64);
                stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::FLAG_POINTS, reward as i64);
            }
        }
        let state = arena.slots.get(self.slot);
        if let Some(game) = state.game.as_mut() {
            game.reset_with_winner(Instant::now());
        }
        let roster = in_ship_roster(self.players.as_ref(), arena.name);
        self.stats.end_interval_players(roster, PersistInterval::Game);
    }
}

impl ArenaModule for FlagGameModule {
    fn name(&self) -> ModuleName {
        "flag"
    }

    fn on_attach(&self, arena: &mut Arena) -> bool {
        let now = Instant::now();
        let flags = (0..self.flag_count).map(|_| FlagSlot::unclaimed(0, 0, now)).collect();
        arena.slots.get(self.slot).game = Some(FlagGame::new(self.mode, flags));
        true
    }

    fn on_detach(&self, arena: &mut Arena) {
        arena.slots.get(self.slot).game = None;
    }
}

// ---------------------------------------------------------------------------------------------
// King of the Hill
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
struct KothModuleState {
    koth: Option<Koth>,
    players: HashMap<PlayerId, KothPlayerState>,
    tick_token: Option<RegistrationToken<ArenaTick>>,
    kill_token: Option<RegistrationToken<OnKill>>,
}

fn millis(config: &dyn ConfigStore, arena: ArenaName, key: &str, default: i32) -> std::time::Duration {
    std::time::Duration::from_millis(config.get_i32(arena, key, default).max(0) as u64 * 10)
}

fn koth_config(config: &dyn ConfigStore, arena: ArenaName) -> KothConfig {
    KothConfig {
        auto_start: config.get_bool(arena, "King:AutoStart", true),
        min_players: config.get_i32(arena, "King:MinPlayers", 0).max(0) as u32,
        start_delay: millis(config, arena, "King:StartDelay", 500),
        expire_time: millis(config, arena, "King:ExpireTime", 6000),
        death_count: config.get_i32(arena, "King:DeathCount", 0).max(0) as u32,
        non_crown_adjust_time: millis(config, arena, "King:NonCrownAdjustTime", 0),
        non_crown_minimum_bounty: config.get_i32(arena, "King:NonCrownMinimumBounty", 0).max(0) as u16,
        crown_recover_kills: config.get_i32(arena, "King:CrownRecoverKills", 3).max(0) as u32,
        reward_factor: config.get_i32(arena, "King:RewardFactor", 0),
        split_points: config.get_bool(arena, "King:SplitPoints", false),
    }
}

/// King-of-the-Hill (§4.8) wired to a live arena: drives the countdown and crown-expiry checks
/// off [`ArenaTick`], and the per-kill crown rules off [`OnKill`].
pub struct KothModule {
    config: Arc<dyn ConfigStore>,
    stats: Arc<StatsStore>,
    players: Arc<PlayerRegistry>,
    jackpots: Arc<JackpotRegistry>,
    slot: SlotKey<ArenaSlotKind, KothModuleState>,
}

impl KothModule {
    pub fn new(config: Arc<dyn ConfigStore>, stats: Arc<StatsStore>, players: Arc<PlayerRegistry>, jackpots: Arc<JackpotRegistry>) -> Self {
        Self {
            config,
            stats,
            players,
            jackpots,
            slot: ARENA_SLOTS.allocate(),
        }
    }

    fn on_tick(arena: &mut Arena, slot: SlotKey<ArenaSlotKind, KothModuleState>, config: &dyn ConfigStore, stats: &StatsStore, jackpots: &JackpotRegistry, players: &PlayerRegistry) {
        let cfg = koth_config(config, arena.name);
        let now = Instant::now();

        let phase = match arena.slots.get(slot).koth.as_ref() {
            Some(koth) => koth.phase,
            None => return,
        };

        match phase {
            KothPhase::Stopped => {}
            KothPhase::Starting => {
                let in_ship = in_ship_roster(players, arena.name);
                let update = match arena.slots.get(slot).koth.as_mut() {
                    Some(koth) => koth.tick_countdown(now, &in_ship, &cfg),
                    None => return,
                };
                if update == koth::CountdownUpdate::Expired {
                    let participants = arena
                        .slots
                        .get(slot)
                        .koth
                        .as_ref()
                        .map(|k| k.initial_participants.clone())
                        .unwrap_or_default();
                    {
                        let state = arena.slots.get(slot);
                        for player_id in &participants {
                            state.players.insert(
                                *player_id,
                                KothPlayerState {
                                    has_crown: true,
                                    expire: Some(now + cfg.expire_time),
                                    death_count: 0,
                                    crown_kill_count: 0,
                                },
                            );
                        }
                    }
                    let broker = Arc::clone(&arena.broker);
                    broker.fire::<KothStarted>(|handler| handler(&mut *arena, &participants));
                }
            }
            KothPhase::Running => {
                let mut crowned = Vec::new();
                let mut just_lost = Vec::new();
                {
                    let state = arena.slots.get(slot);
                    for (player_id, player_state) in state.players.iter_mut() {
                        if !player_state.has_crown {
                            continue;
                        }
                        let freq = players.get(*player_id).map(|h| h.lock().unwrap().freq).unwrap_or_default();
                        if let Some(expire) = player_state.expire {
                            if now >= expire {
                                player_state.has_crown = false;
                                player_state.expire = None;
                                just_lost.push((*player_id, freq));
                                continue;
                            }
                        }
                        crowned.push((*player_id, freq, player_state.expire.unwrap_or(now)));
                    }
                }

                match koth::check_win(&crowned, &just_lost) {
                    koth::WinCheck::Winner(_freq, winners) => {
                        let initial_player_count = arena.slots.get(slot).koth.as_ref().map(|k| k.initial_player_count).unwrap_or(0);
                        let jackpot = jackpots.jackpot_for(arena.name);
                        let reward = koth::reward_points(initial_player_count, cfg.reward_factor, jackpot.get(), cfg.split_points, winners.len() as u32);
                        jackpot.reset();
                        for winner in &winners {
                            let player_stats = stats.stats_for(*winner);
                            player_stats.increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::FLAG_POINTS, reward as i64);
                            player_stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::FLAG_POINTS, reward as i64);
                            player_stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::KOTH_GAMES_WON, 1);
                        }
                        let roster = in_ship_roster(players, arena.name);
                        stats.end_interval_players(roster, PersistInterval::Game);
                        let state = arena.slots.get(slot);
                        if let Some(koth) = state.koth.as_mut() {
                            koth.force_stop(&cfg);
                        }
                        state.players.clear();
                        let broker = Arc::clone(&arena.broker);
                        broker.fire::<KothWon>(|handler| handler(&mut *arena, &winners, reward));
                    }
                    koth::WinCheck::ExpireOldest(player_id) => {
                        if let Some(player_state) = arena.slots.get(slot).players.get_mut(&player_id) {
                            player_state.has_crown = false;
                            player_state.expire = None;
                        }
                    }
                    koth::WinCheck::None => {}
                }
            }
        }
    }

    fn on_kill(arena: &mut Arena, slot: SlotKey<ArenaSlotKind, KothModuleState>, config: &dyn ConfigStore, jackpots: &JackpotRegistry, killer: PlayerId, killer_bounty: u16, killed: PlayerId, killed_bounty: u16) {
        let cfg = koth_config(config, arena.name);
        let jackpot_bounty_percent = config.get_i32(arena.name, "Kill:JackpotBountyPercent", 0);
        jackpots.jackpot_for(arena.name).on_kill(killed_bounty, jackpot_bounty_percent);

        let state = arena.slots.get(slot);
        if state.koth.as_ref().map(|k| k.phase) != Some(KothPhase::Running) {
            return;
        }
        let mut killer_state = state.players.get(&killer).copied().unwrap_or_default();
        let mut killed_state = state.players.get(&killed).copied().unwrap_or_default();
        koth::on_kill(&mut killer_state, &mut killed_state, killer_bounty, &cfg, Instant::now());
        state.players.insert(killer, killer_state);
        state.players.insert(killed, killed_state);
    }

    /// `?resetkoth`.
    pub fn force_stop(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        let cfg = koth_config(self.config.as_ref(), arena.name);
        let state = arena.slots.get(self.slot);
        if let Some(koth) = state.koth.as_mut() {
            koth.force_stop(&cfg);
        }
        state.players.clear();
    }
}

impl ArenaModule for KothModule {
    fn name(&self) -> ModuleName {
        "koth"
    }

    fn on_attach(&self, arena: &mut Arena) -> bool {
        let cfg = koth_config(self.config.as_ref(), arena.name);
        arena.slots.get(self.slot).koth = Some(Koth::new(&cfg));

        let slot = self.slot;
        let config = Arc::clone(&self.config);
        let stats = Arc::clone(&self.stats);
        let jackpots = Arc::clone(&self.jackpots);
        let players = Arc::clone(&self.players);
        let tick_token = arena.broker.register_callback::<ArenaTick>(Arc::new(move |arena: &mut Arena| {
            Self::on_tick(arena, slot, config.as_ref(), stats.as_ref(), jackpots.as_ref(), players.as_ref());
        }));

        let config = Arc::clone(&self.config);
        let jackpots = Arc::clone(&self.jackpots);
        let kill_token = arena.broker.register_callback::<OnKill>(Arc::new(
            move |arena: &mut Arena, killer: PlayerId, killer_bounty: u16, killed: PlayerId, killed_bounty: u16, _is_team_kill: bool| {
                Self::on_kill(arena, slot, config.as_ref(), jackpots.as_ref(), killer, killer_bounty, killed, killed_bounty);
            },
        ));

        let state = arena.slots.get(self.slot);
        state.tick_token = Some(tick_token);
        state.kill_token = Some(kill_token);
        true
    }

    fn on_detach(&self, arena: &mut Arena) {
        let state = arena.slots.get(self.slot);
        let tick_token = state.tick_token.take();
        let kill_token = state.kill_token.take();
        state.koth = None;
        state.players.clear();
        if let Some(token) = tick_token {
            arena.broker.unregister_callback(token);
        }
        if let Some(token) = kill_token {
            arena.broker.unregister_callback(token);
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Speed game
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
struct SpeedModuleState {
    game: Option<SpeedGame>,
    tick_token: Option<RegistrationToken<ArenaTick>>,
    kill_token: Option<RegistrationToken<OnKill>>,
}

/// A positive, module-private stat code for the speed game's personal best, per the
/// `stat_code` module's convention that negative codes are reserved for core-defined stats.
const SPEED_PERSONAL_BEST: StatCode = StatCode(1);

fn speed_config(config: &dyn ConfigStore, arena: ArenaName) -> SpeedGameConfig {
    SpeedGameConfig {
        auto_start: config.get_bool(arena, "Speed:AutoStart", true),
        min_players: config.get_i32(arena, "Speed:MinPlayers", 0).max(0) as u32,
        start_delay: millis(config, arena, "Speed:StartDelay", 500),
        game_duration: millis(config, arena, "Speed:TimeLimit", 30000),
    }
}

/// The speed game (§4.9) wired to a live arena.
pub struct SpeedGameModule {
    config: Arc<dyn ConfigStore>,
    stats: Arc<StatsStore>,
    players: Arc<PlayerRegistry>,
    slot: SlotKey<ArenaSlotKind, SpeedModuleState>,
}

impl SpeedGameModule {
    pub fn new(config: Arc<dyn ConfigStore>, stats: Arc<StatsStore>, players: Arc<PlayerRegistry>) -> Self {
        Self {
            config,
            stats,
            players,
            slot: ARENA_SLOTS.allocate(),
        }
    }

    fn on_tick(arena: &mut Arena, slot: SlotKey<ArenaSlotKind, SpeedModuleState>, config: &dyn ConfigStore, stats: &StatsStore, players: &PlayerRegistry) {
        let cfg = speed_config(config, arena.name);
        let now = Instant::now();

        let phase = match arena.slots.get(slot).game.as_ref() {
            Some(game) => game.phase,
            None => return,
        };

        match phase {
            SpeedPhase::Stopped => {}
            SpeedPhase::Starting => {
                let in_ship_count = in_ship_roster(players, arena.name).len() as u32;
                if let Some(game) = arena.slots.get(slot).game.as_mut() {
                    game.tick_countdown(now, in_ship_count, &cfg);
                }
            }
            SpeedPhase::Running => {
                let round_over = arena.slots.get(slot).game.as_ref().map(|g| g.is_round_over(now, &cfg)).unwrap_or(false);
                if !round_over {
                    return;
                }
                let roster = in_ship_roster(players, arena.name);
                for player_id in &roster {
                    let player_id = *player_id;
                    let prior_best = stats
                        .stats_for(player_id)
                        .try_get_i32(PersistScope::PerArena, PersistInterval::Forever, SPEED_PERSONAL_BEST)
                        .unwrap_or(0);
                    let new_best = arena
                        .slots
                        .get(slot)
                        .game
                        .as_ref()
                        .map(|g| g.end_round_stats(player_id, prior_best).1)
                        .unwrap_or(prior_best);
                    stats
                        .stats_for(player_id)
                        .set(PersistScope::PerArena, PersistInterval::Forever, SPEED_PERSONAL_BEST, StatValue::I32(new_best));
                }
                if let Some(game) = arena.slots.get(slot).game.as_mut() {
                    game.end_round(&cfg);
                }
                stats.end_interval_players(roster, PersistInterval::Game);
            }
        }
    }

    fn on_kill(arena: &mut Arena, slot: SlotKey<ArenaSlotKind, SpeedModuleState>, stats: &StatsStore, killer: PlayerId) {
        let state = arena.slots.get(slot);
        let Some(game) = state.game.as_mut() else { return };
        if game.phase != SpeedPhase::Running {
            return;
        }
        let current = stats
            .stats_for(killer)
            .try_get_i32(PersistScope::PerArena, PersistInterval::Game, stat_code::KILL_POINTS)
            .unwrap_or(0);
        game.on_kill(killer, current);
    }
}

impl ArenaModule for SpeedGameModule {
    fn name(&self) -> ModuleName {
        "speed"
    }

    fn on_attach(&self, arena: &mut Arena) -> bool {
        let cfg = speed_config(self.config.as_ref(), arena.name);
        arena.slots.get(self.slot).game = Some(SpeedGame::new(&cfg));

        let slot = self.slot;
        let config = Arc::clone(&self.config);
        let stats = Arc::clone(&self.stats);
        let players = Arc::clone(&self.players);
        let tick_token = arena.broker.register_callback::<ArenaTick>(Arc::new(move |arena: &mut Arena| {
            Self::on_tick(arena, slot, config.as_ref(), stats.as_ref(), players.as_ref());
        }));

        let stats = Arc::clone(&self.stats);
        let kill_token = arena.broker.register_callback::<OnKill>(Arc::new(
            move |arena: &mut Arena, killer: PlayerId, _killer_bounty: u16, _killed: PlayerId, _killed_bounty: u16, _is_team_kill: bool| {
                Self::on_kill(arena, slot, stats.as_ref(), killer);
            },
        ));

        let state = arena.slots.get(self.slot);
        state.tick_token = Some(tick_token);
        state.kill_token = Some(kill_token);
        true
    }

    fn on_detach(&self, arena: &mut Arena) {
        let state = arena.slots.get(self.slot);
        let tick_token = state.tick_token.take();
        let kill_token = state.kill_token.take();
        state.game = None;
        if let Some(token) = tick_token {
            arena.broker.unregister_callback(token);
        }
        if let Some(token) = kill_token {
            arena.broker.unregister_callback(token);
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Periodic reward
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
struct PeriodicModuleState {
    schedule: PeriodicSchedule,
    tick_token: Option<RegistrationToken<ArenaTick>>,
}

fn periodic_config(config: &dyn ConfigStore, arena: ArenaName) -> PeriodicConfig {
    PeriodicConfig {
        reward_delay: common_util::ticks::Ticks(config.get_i32(arena, "Periodic:RewardDelay", 3000).max(0) as u32),
        reward_points: config.get_i32(arena, "Periodic:RewardPoints", 0),
        split_points: config.get_bool(arena, "Periodic:SplitPoints", false),
        include_spectators: config.get_bool(arena, "Periodic:IncludeSpectators", false),
        include_safe_zones: config.get_bool(arena, "Periodic:IncludeSafeZones", false),
    }
}

/// The recurring periodic reward (§4.10) wired to a live arena. When `flag_slot` names a
/// [`FlagGameModule`] attached to the same arena, the reward is scaled by each freq's live
/// flag count; otherwise every freq counts zero flags and no reward fires.
pub struct PeriodicRewardModule {
    config: Arc<dyn ConfigStore>,
    stats: Arc<StatsStore>,
    players: Arc<PlayerRegistry>,
    flag_slot: Option<SlotKey<ArenaSlotKind, FlagModuleState>>,
    slot: SlotKey<ArenaSlotKind, PeriodicModuleState>,
}

impl PeriodicRewardModule {
    pub fn new(config: Arc<dyn ConfigStore>, stats: Arc<StatsStore>, players: Arc<PlayerRegistry>, flag_module: Option<&FlagGameModule>) -> Self {
        Self {
            config,
            stats,
            players,
            flag_slot: flag_module.map(|m| m.slot()),
            slot: ARENA_SLOTS.allocate(),
        }
    }

    fn flag_counts(arena: &Arena, flag_slot: Option<SlotKey<ArenaSlotKind, FlagModuleState>>) -> HashMap<Freq, u32> {
        let mut counts = HashMap::new();
        let Some(flag_slot) = flag_slot else { return counts };
        let Some(flag_state) = arena.slots.try_get(flag_slot) else { return counts };
        let Some(game) = &flag_state.game else { return counts };
        for flag in &game.flags {
            if let Some(freq) = flag.owner_freq {
                *counts.entry(freq).or_insert(0) += 1;
            }
        }
        counts
    }

    fn fire_reward(arena: &mut Arena, slot: SlotKey<ArenaSlotKind, PeriodicModuleState>, flag_slot: Option<SlotKey<ArenaSlotKind, FlagModuleState>>, config: &dyn ConfigStore, stats: &StatsStore, players: &PlayerRegistry) {
        let cfg = periodic_config(config, arena.name);
        let snapshots: Vec<PlayerSnapshot> = players
            .lock()
            .values()
            .filter_map(|p| {
                let p = p.lock().unwrap();
                (p.arena == Some(arena.name)).then_some(PlayerSnapshot {
                    player_id: p.player_id,
                    freq: p.freq,
                    is_spectator: p.ship.is_spectator(),
                    in_safe_zone: p.position.in_safe_zone,
                })
            })
            .collect();
        let counts = Self::flag_counts(arena, flag_slot);
        let outcome = periodic::compute(&snapshots, &cfg, |freq| counts.get(&freq).copied().unwrap_or(0));

        for packet in outcome.packets {
            arena.push_outbound(packet);
        }
        for (player_id, amount) in outcome.player_increments {
            let player_stats = stats.stats_for(player_id);
            player_stats.increment(PersistScope::PerArena, PersistInterval::Reset, stat_code::FLAG_POINTS, amount as i64);
            player_stats.increment(PersistScope::PerArena, PersistInterval::Forever, stat_code::FLAG_POINTS, amount as i64);
        }
        let _ = slot;
    }

    /// `?periodicreward`: fires the same reward computation as the automatic timer, then
    /// restarts the countdown.
    pub fn force_reward(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        Self::fire_reward(&mut arena, self.slot, self.flag_slot, self.config.as_ref(), self.stats.as_ref(), self.players.as_ref());
        arena.slots.get(self.slot).schedule.force_fire();
    }

    /// `?periodicreset`: restarts the countdown without firing a reward.
    pub fn reset_timer(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        arena.slots.get(self.slot).schedule.reset();
    }

    /// `?periodicstop`: halts automatic firing.
    pub fn stop(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        arena.slots.get(self.slot).schedule.stop();
    }

    pub fn resume(&self, arena_handle: &ArenaHandle) {
        let mut arena = arena_handle.lock().unwrap();
        arena.slots.get(self.slot).schedule.resume();
    }
}

impl ArenaModule for PeriodicRewardModule {
    fn name(&self) -> ModuleName {
        "periodic"
    }

    fn on_attach(&self, arena: &mut Arena) -> bool {
        let slot = self.slot;
        let flag_slot = self.flag_slot;
        let config = Arc::clone(&self.config);
        let stats = Arc::clone(&self.stats);
        let players = Arc::clone(&self.players);
        let tick_token = arena.broker.register_callback::<ArenaTick>(Arc::new(move |arena: &mut Arena| {
            let cfg = periodic_config(config.as_ref(), arena.name);
            let fires = arena.slots.get(slot).schedule.tick(&cfg);
            if !fires {
                return;
            }
            PeriodicRewardModule::fire_reward(arena, slot, flag_slot, config.as_ref(), stats.as_ref(), players.as_ref());
            arena.slots.get(slot).schedule.reset_timer();
        }));
        arena.slots.get(self.slot).tick_token = Some(tick_token);
        true
    }

    fn on_detach(&self, arena: &mut Arena) {
        let token = arena.slots.get(self.slot).tick_token.take();
        if let Some(token) = token {
            arena.broker.unregister_callback(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaManager;
    use crate::broker::Broker;
    use crate::config::MemoryConfigStore;
    use crate::player::ConnectionHandle;
    use core_protocol::id::Ship;
    use std::num::NonZeroU32;

    fn pid(n: u32) -> PlayerId {
        PlayerId(NonZeroU32::new(n).unwrap())
    }

    fn harness() -> (Arc<dyn ConfigStore>, Arc<StatsStore>, Arc<PlayerRegistry>, Arc<JackpotRegistry>) {
        (
            Arc::new(MemoryConfigStore::new()),
            Arc::new(StatsStore::new()),
            Arc::new(PlayerRegistry::new()),
            Arc::new(JackpotRegistry::new()),
        )
    }

    #[test]
    fn ball_goal_resets_scores_and_pays_reward_on_win() {
        let (_config, stats, players, _jackpots) = harness();
        let memory = MemoryConfigStore::new();
        let arena_name = ArenaName::new("turf");
        memory.set(arena_name, "Soccer:Mode", "1");
        memory.set(arena_name, "Soccer:CapturePoints", "1");
        memory.set(arena_name, "Soccer:Reward", "-5");
        let config: Arc<dyn ConfigStore> = Arc::new(memory);

        let module = Arc::new(BallGameModule::new(config, stats, players));
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::clone(&module) as Arc<dyn ArenaModule>];
        let manager = ArenaManager::new(Broker::new_root());
        let arena = manager.get_or_create(arena_name, &modules);

        let reward = module.on_goal(&arena, pid(1), Freq(0), Some(Freq(1)));
        assert_eq!(reward, 5);
        assert_eq!(module.score_line(&arena), "freq 0: 1  freq 1: 1");
        assert_eq!(arena.lock().unwrap().outbound.lock().unwrap().len(), 1);
    }

    #[test]
    fn koth_force_stop_clears_crown_state() {
        let (config, stats, players, jackpots) = harness();
        let module = Arc::new(KothModule::new(config, stats, players, jackpots));
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::clone(&module) as Arc<dyn ArenaModule>];
        let manager = ArenaManager::new(Broker::new_root());
        let arena = manager.get_or_create(ArenaName::new("turf"), &modules);

        {
            let mut locked = arena.lock().unwrap();
            let state = locked.slots.get(module.slot);
            state.players.insert(pid(1), KothPlayerState { has_crown: true, ..Default::default() });
        }

        module.force_stop(&arena);

        let mut locked = arena.lock().unwrap();
        let state = locked.slots.get(module.slot);
        assert!(state.players.is_empty());
        assert_eq!(state.koth.as_ref().unwrap().phase, KothPhase::Stopped);
    }

    #[test]
    fn koth_crowns_participants_and_pays_flag_points_on_win() {
        let (_config, stats, players, jackpots) = harness();
        let memory = MemoryConfigStore::new();
        let arena_name = ArenaName::new("turf");
        memory.set(arena_name, "King:MinPlayers", "1");
        memory.set(arena_name, "King:StartDelay", "0");
        memory.set(arena_name, "King:RewardFactor", "1000");
        let config: Arc<dyn ConfigStore> = Arc::new(memory);

        let endpoint = ConnectionHandle(3);
        let handle = players.allocate_player(endpoint);
        let player_id = {
            let mut player = handle.lock().unwrap();
            player.arena = Some(arena_name);
            player.ship = Ship::Warbird;
            player.player_id
        };

        let module = Arc::new(KothModule::new(config, Arc::clone(&stats), Arc::clone(&players), jackpots));
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::clone(&module) as Arc<dyn ArenaModule>];
        let manager = ArenaManager::new(Broker::new_root());
        let arena = manager.get_or_create(arena_name, &modules);

        let broker = Arc::clone(&arena.lock().unwrap().broker);
        // Tick 1 starts the countdown; tick 2 observes it expired (StartDelay is 0) and
        // crowns the lone participant; tick 3 sees the sole crown and declares a win.
        broker.fire::<ArenaTick>(|handler| handler(&mut arena.lock().unwrap()));
        broker.fire::<ArenaTick>(|handler| handler(&mut arena.lock().unwrap()));
        broker.fire::<ArenaTick>(|handler| handler(&mut arena.lock().unwrap()));

        assert_eq!(
            stats
                .stats_for(player_id)
                .try_get_i32(PersistScope::PerArena, PersistInterval::Forever, stat_code::FLAG_POINTS),
            Some(1000)
        );
        assert_eq!(
            stats
                .stats_for(player_id)
                .try_get_i32(PersistScope::PerArena, PersistInterval::Forever, stat_code::KOTH_GAMES_WON),
            Some(1)
        );

        let locked = arena.lock().unwrap();
        let state = locked.slots.try_get(module.slot).unwrap();
        assert!(state.players.is_empty());
        // King:AutoStart defaults true, so a win resets straight back into Starting.
        assert_eq!(state.koth.as_ref().unwrap().phase, KothPhase::Starting);
    }

    #[test]
    fn speed_tick_starts_countdown_once_min_players_present() {
        let (config, stats, players, _jackpots) = harness();
        let endpoint = ConnectionHandle(1);
        let handle = players.allocate_player(endpoint);
        {
            let mut player = handle.lock().unwrap();
            player.arena = Some(ArenaName::new("turf"));
            player.ship = Ship::Warbird;
        }

        let module = Arc::new(SpeedGameModule::new(config, stats, players));
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::clone(&module) as Arc<dyn ArenaModule>];
        let manager = ArenaManager::new(Broker::new_root());
        let arena = manager.get_or_create(ArenaName::new("turf"), &modules);

        let broker = Arc::clone(&arena.lock().unwrap().broker);
        let mut locked = arena.lock().unwrap();
        broker.fire::<ArenaTick>(|handler| handler(&mut locked));
        drop(locked);

        let phase = arena.lock().unwrap().slots.try_get(module_speed_slot(&module)).map(|s| s.game.as_ref().unwrap().phase);
        assert_eq!(phase, Some(SpeedPhase::Starting));
    }

    fn module_speed_slot(module: &SpeedGameModule) -> SlotKey<ArenaSlotKind, SpeedModuleState> {
        module.slot
    }

    #[test]
    fn periodic_reward_force_fires_without_waiting_for_the_timer() {
        let (config, stats, players, _jackpots) = harness();
        let endpoint = ConnectionHandle(2);
        let handle = players.allocate_player(endpoint);
        {
            let mut player = handle.lock().unwrap();
            player.arena = Some(ArenaName::new("turf"));
        }
        let module = Arc::new(PeriodicRewardModule::new(config, stats, players, None));
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::clone(&module) as Arc<dyn ArenaModule>];
        let manager = ArenaManager::new(Broker::new_root());
        let arena = manager.get_or_create(ArenaName::new("turf"), &modules);

        module.force_reward(&arena);
        // With no flag module wired, every freq counts zero flags so the reward is a no-op;
        // this only asserts the command surface runs without panicking and leaves the
        // countdown reset.
        assert!(arena.lock().unwrap().attached_modules.contains(&"periodic"));
    }
}
