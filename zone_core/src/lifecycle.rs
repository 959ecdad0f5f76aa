// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The lifecycle engine (§4.4): drives the player state machine and fires the `PlayerAction`
//! callbacks (`PreEnterArena, EnterArena, LeaveArena, Disconnect, ...`) on the arena broker,
//! or the global broker when the player has no current arena.

use crate::arena::{Arena, ArenaHandle, ArenaManager, ArenaModule};
use crate::broker::Broker;
use crate::player::{Player, PlayerHandle, PlayerLifecycle, TimeWaitReason};
use core_protocol::name::ArenaName;
use log::warn;
use std::sync::Arc;

/// Fired on a player state transition. Handlers receive the player record as it stands at
/// the moment of firing, not a mutable view; lifecycle fields are only changed by this engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlayerAction {
    PreEnterArena,
    EnterArena,
    LeaveArena,
    Disconnect,
}

pub type PlayerActionCallback = dyn Fn(&Player, PlayerAction) + Send + Sync;

/// `DoGlobalCallbacks` handlers report success/failure, unlike the fire-and-forget
/// `PlayerActionCallback`s, because a failure here disconnects the player with an
/// auth-like error (§4.4).
pub type GlobalCallback = dyn Fn(&Player) -> bool + Send + Sync;

fn fire_action(broker: &Arc<Broker>, player: &Player, action: PlayerAction) {
    broker.fire::<PlayerActionCallback>(|handler| handler(player, action));
}

/// The broker a player's transitions fire on: its current arena's broker if it has one,
/// otherwise the global broker (§4.4).
fn broker_for(player: &Player, global: &Arc<Broker>, arenas: &ArenaManager) -> Arc<Broker> {
    match player.arena.and_then(|name| arenas.get(name)) {
        Some(arena) => Arc::clone(&arena.lock().unwrap().broker),
        None => Arc::clone(global),
    }
}

/// Drives players between `Connected` and `Playing` and back down through `TimeWait`. Holds
/// no player state itself; every call takes the [`PlayerHandle`] it acts on.
pub struct LifecycleEngine {
    global_broker: Arc<Broker>,
    arenas: Arc<ArenaManager>,
}

impl LifecycleEngine {
    pub fn new(global_broker: Arc<Broker>, arenas: Arc<ArenaManager>) -> Self {
        Self { global_broker, arenas }
    }

    /// `Connected -> NeedAuth -> WaitAuth`, then either `NeedGlobalSync -> WaitGlobalSync ->
    /// DoGlobalCallbacks -> SendLoginResponse -> LoggedIn` on success, or `TimeWait` on
    /// auth failure. `DoGlobalCallbacks` handlers are polled and ANDed; any `false` disconnects
    /// the player with `GlobalCallbackFailed` per §4.4's "auth-like error code" rule.
    pub fn authenticate(&self, handle: &PlayerHandle, auth_succeeded: bool) {
        let mut player = handle.lock().unwrap();
        debug_assert_eq!(player.lifecycle, PlayerLifecycle::Connected);
        player.lifecycle = PlayerLifecycle::NeedAuth;
        player.lifecycle = PlayerLifecycle::WaitAuth;

        if !auth_succeeded {
            player.lifecycle = PlayerLifecycle::TimeWait { reason: TimeWaitReason::AuthFailed };
            return;
        }

        player.lifecycle = PlayerLifecycle::NeedGlobalSync;
        player.lifecycle = PlayerLifecycle::WaitGlobalSync;
        player.lifecycle = PlayerLifecycle::DoGlobalCallbacks;

        let ok = self
            .global_broker
            .callbacks::<GlobalCallback>()
            .iter()
            .all(|handler| handler(&player));

        if !ok {
            warn!("player {:?} failed DoGlobalCallbacks; disconnecting", player.player_id);
            player.lifecycle = PlayerLifecycle::TimeWait { reason: TimeWaitReason::GlobalCallbackFailed };
            return;
        }

        player.lifecycle = PlayerLifecycle::SendLoginResponse;
        player.lifecycle = PlayerLifecycle::LoggedIn;
    }

    /// `LoggedIn -> DoFreqAndArenaSync` (fires `PreEnterArena`) `-> ArenaRespAndCallbacks`
    /// (fires `EnterArena`) `-> Playing`. Creates the arena lazily via the arena manager if
    /// it does not already exist.
    pub fn enter_arena(&self, handle: &PlayerHandle, name: ArenaName, modules: &[Arc<dyn ArenaModule>]) -> ArenaHandle {
        let mut player = handle.lock().unwrap();
        debug_assert_eq!(player.lifecycle, PlayerLifecycle::LoggedIn);

        let arena = self.arenas.get_or_create(name, modules);
        let arena_broker = Arc::clone(&arena.lock().unwrap().broker);

        player.lifecycle = PlayerLifecycle::DoFreqAndArenaSync;
        fire_action(&arena_broker, &player, PlayerAction::PreEnterArena);

        player.arena = Some(name);
        player.lifecycle = PlayerLifecycle::ArenaRespAndCallbacks;
        fire_action(&arena_broker, &player, PlayerAction::EnterArena);

        {
            let mut arena_guard = arena.lock().unwrap();
            arena_guard.player_count += 1;
            arena_guard.empty_since = None;
        }

        player.lifecycle = PlayerLifecycle::Playing;
        arena
    }

    /// `Playing -> LeavingArena` (fires `LeaveArena`) `-> WaitArenaSync2 -> LoggedIn`, the
    /// cycle back to arena selection described in §4.4. Decrements the arena's player count
    /// and starts its idle-teardown clock when it reaches zero.
    pub fn leave_arena(&self, handle: &PlayerHandle, now: std::time::Instant) {
        let mut player = handle.lock().unwrap();
        debug_assert_eq!(player.lifecycle, PlayerLifecycle::Playing);

        let Some(name) = player.arena else {
            player.lifecycle = PlayerLifecycle::LoggedIn;
            return;
        };
        let Some(arena) = self.arenas.get(name) else {
            player.lifecycle = PlayerLifecycle::LoggedIn;
            return;
        };

        player.lifecycle = PlayerLifecycle::LeavingArena;
        let arena_broker = Arc::clone(&arena.lock().unwrap().broker);
        fire_action(&arena_broker, &player, PlayerAction::LeaveArena);

        player.arena = None;
        mark_arena_departure(&arena, now);

        player.lifecycle = PlayerLifecycle::WaitArenaSync2;
        player.lifecycle = PlayerLifecycle::LoggedIn;
    }

    /// Disconnects a player from wherever they currently are. Fires `Disconnect` on the
    /// player's current broker (arena broker if present, else global), then drives through
    /// `LeavingArena`/`LeavingZone`/`WaitGlobalSync2` into a terminal `TimeWait`.
    pub fn disconnect(&self, handle: &PlayerHandle, reason: TimeWaitReason, now: std::time::Instant) {
        let mut player = handle.lock().unwrap();
        if player.lifecycle.is_terminal() {
            return;
        }

        let broker = broker_for(&player, &self.global_broker, &self.arenas);
        fire_action(&broker, &player, PlayerAction::Disconnect);

        if let Some(name) = player.arena.take() {
            player.lifecycle = PlayerLifecycle::LeavingArena;
            if let Some(arena) = self.arenas.get(name) {
                mark_arena_departure(&arena, now);
            }
            player.lifecycle = PlayerLifecycle::WaitArenaSync2;
        }

        player.lifecycle = PlayerLifecycle::LeavingZone;
        player.lifecycle = PlayerLifecycle::WaitGlobalSync2;
        player.lifecycle = PlayerLifecycle::TimeWait { reason };
    }
}

fn mark_arena_departure(arena: &ArenaHandle, now: std::time::Instant) {
    let mut guard: std::sync::MutexGuard<Arena> = arena.lock().unwrap();
    guard.player_count = guard.player_count.saturating_sub(1);
    if guard.player_count == 0 {
        guard.empty_since = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ConnectionHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn engine() -> (LifecycleEngine, Arc<Broker>, Arc<ArenaManager>) {
        let global = Broker::new_root();
        let arenas = Arc::new(ArenaManager::new(Arc::clone(&global)));
        (LifecycleEngine::new(Arc::clone(&global), Arc::clone(&arenas)), global, arenas)
    }

    fn allocate(global: &Arc<Broker>) -> PlayerHandle {
        let _ = global;
        let mut player = Player::for_test(core_protocol::id::PlayerId::generate(), ConnectionHandle(1));
        player.lifecycle = PlayerLifecycle::Connected;
        Arc::new(std::sync::Mutex::new(player))
    }

    #[test]
    fn successful_auth_reaches_logged_in() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        engine.authenticate(&handle, true);
        assert_eq!(handle.lock().unwrap().lifecycle, PlayerLifecycle::LoggedIn);
    }

    #[test]
    fn failed_auth_lands_in_time_wait() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        engine.authenticate(&handle, false);
        assert_eq!(
            handle.lock().unwrap().lifecycle,
            PlayerLifecycle::TimeWait { reason: TimeWaitReason::AuthFailed }
        );
    }

    #[test]
    fn failing_global_callback_disconnects_with_auth_like_error() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        global.register_callback::<GlobalCallback>(Arc::new(|_player: &Player| false));
        engine.authenticate(&handle, true);
        assert_eq!(
            handle.lock().unwrap().lifecycle,
            PlayerLifecycle::TimeWait { reason: TimeWaitReason::GlobalCallbackFailed }
        );
    }

    #[test]
    fn enter_then_leave_arena_cycles_back_to_logged_in_and_fires_actions() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        handle.lock().unwrap().lifecycle = PlayerLifecycle::LoggedIn;

        let seen_enter = Arc::new(AtomicBool::new(false));
        let seen_enter_for_cb = Arc::clone(&seen_enter);
        global.register_callback::<PlayerActionCallback>(Arc::new(move |_p, action| {
            if action == PlayerAction::EnterArena {
                seen_enter_for_cb.store(true, Ordering::SeqCst);
            }
        }));

        let modules: Vec<Arc<dyn ArenaModule>> = Vec::new();
        let arena = engine.enter_arena(&handle, ArenaName::new("turf"), &modules);
        assert_eq!(handle.lock().unwrap().lifecycle, PlayerLifecycle::Playing);
        assert_eq!(arena.lock().unwrap().player_count, 1);
        assert!(seen_enter.load(Ordering::SeqCst));

        engine.leave_arena(&handle, Instant::now());
        assert_eq!(handle.lock().unwrap().lifecycle, PlayerLifecycle::LoggedIn);
        assert!(handle.lock().unwrap().arena.is_none());
        assert_eq!(arena.lock().unwrap().player_count, 0);
        assert!(arena.lock().unwrap().empty_since.is_some());
    }

    #[test]
    fn disconnect_from_terminal_state_is_a_no_op() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        handle.lock().unwrap().lifecycle = PlayerLifecycle::TimeWait { reason: TimeWaitReason::Kicked };
        engine.disconnect(&handle, TimeWaitReason::NormalDisconnect, Instant::now());
        assert_eq!(
            handle.lock().unwrap().lifecycle,
            PlayerLifecycle::TimeWait { reason: TimeWaitReason::Kicked }
        );
    }

    #[test]
    fn disconnect_while_in_arena_releases_it_and_decrements_count() {
        let (engine, global, _arenas) = engine();
        let handle = allocate(&global);
        handle.lock().unwrap().lifecycle = PlayerLifecycle::LoggedIn;
        let modules: Vec<Arc<dyn ArenaModule>> = Vec::new();
        let arena = engine.enter_arena(&handle, ArenaName::new("turf"), &modules);

        engine.disconnect(&handle, TimeWaitReason::NormalDisconnect, Instant::now());
        assert_eq!(
            handle.lock().unwrap().lifecycle,
            PlayerLifecycle::TimeWait { reason: TimeWaitReason::NormalDisconnect }
        );
        assert_eq!(arena.lock().unwrap().player_count, 0);
    }
}
