// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The player registry: a process-wide table of connected players, and the player lifecycle
//! state machine that drives admission into and departure from arenas (§4.3, §4.4).
//!
//! Players are exclusively owned by [`PlayerRegistry`]; every other subsystem holds a
//! `Player` only while a read lock ([`PlayerRegistry::lock`]) is held, mirroring how
//! `PlayerRepo` in the upstream engine is the sole owner of `PlayerTuple`.

use core_protocol::id::{Freq, PlayerId, Ship};
use core_protocol::name::{ArenaName, PlayerAlias};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

/// Opaque handle standing in for the external UDP connection resource. Framing, encryption,
/// and socket ownership live in the network layer this core treats as a collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionHandle(pub u64);

/// A capability a client has negotiated (protocol extension, continuum vs. subspace client,
/// etc). Opaque to the core beyond set membership.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Capability(pub u32);

/// The player state machine (§4.4). Transitions are driven by authentication completion,
/// arena-selection requests, chat/command events, and disconnection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlayerLifecycle {
    Uninitialized,
    Connected,
    NeedAuth,
    WaitAuth,
    NeedGlobalSync,
    WaitGlobalSync,
    DoGlobalCallbacks,
    SendLoginResponse,
    LoggedIn,
    DoFreqAndArenaSync,
    ArenaRespAndCallbacks,
    Playing,
    LeavingArena,
    WaitArenaSync2,
    LeavingZone,
    WaitGlobalSync2,
    TimeWait { reason: TimeWaitReason },
}

/// Why a player landed in `TimeWait`, the terminal holding state before teardown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeWaitReason {
    NormalDisconnect,
    AuthFailed,
    GlobalCallbackFailed,
    Kicked,
}

impl PlayerLifecycle {
    /// §3 invariant: a player has a current arena iff lifecycle is in this set.
    pub fn has_current_arena(&self) -> bool {
        matches!(
            self,
            PlayerLifecycle::DoFreqAndArenaSync
                | PlayerLifecycle::ArenaRespAndCallbacks
                | PlayerLifecycle::Playing
                | PlayerLifecycle::LeavingArena
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlayerLifecycle::TimeWait { .. })
    }
}

/// A position/status snapshot last reported by the client, as relayed through the (external)
/// wire protocol decoder.
#[derive(Copy, Clone, Debug, Default)]
pub struct PositionSnapshot {
    pub x: i16,
    pub y: i16,
    pub bounty: u16,
    pub in_safe_zone: bool,
    pub is_antiwarped: bool,
}

/// Mirror of the four fields the client displays, kept in sync by the stats subsystem's
/// score broadcast (§4.11).
#[derive(Copy, Clone, Debug, Default)]
pub struct ScoringMirror {
    pub kill_points: i32,
    pub flag_points: i32,
    pub wins: u32,
    pub losses: u32,
}

pub struct Player {
    pub player_id: PlayerId,
    pub name: PlayerAlias,
    pub endpoint: ConnectionHandle,
    pub capabilities: HashSet<Capability>,
    pub arena: Option<ArenaName>,
    pub ship: Ship,
    pub freq: Freq,
    pub lifecycle: PlayerLifecycle,
    pub position: PositionSnapshot,
    pub flags_carried: u32,
    pub ball_carried: Option<u8>,
    pub has_crown: bool,
    pub banner: Option<[u8; 96]>,
    pub scoring: ScoringMirror,
}

impl Player {
    fn new(player_id: PlayerId, endpoint: ConnectionHandle) -> Self {
        Self {
            player_id,
            name: PlayerAlias::default(),
            endpoint,
            capabilities: HashSet::new(),
            arena: None,
            ship: Ship::Spectator,
            freq: Freq(8025),
            lifecycle: PlayerLifecycle::Uninitialized,
            position: PositionSnapshot::default(),
            flags_carried: 0,
            ball_carried: None,
            has_crown: false,
            banner: None,
            scoring: ScoringMirror::default(),
        }
    }

    /// §3 invariant: a crown can be present only on a non-spectator player with an
    /// associated expiry (tracked by the KOTH module's slot, not here).
    pub fn can_hold_crown(&self) -> bool {
        !self.ship.is_spectator()
    }

    /// Builds a standalone player record outside the registry, for rules-module unit tests
    /// that need a `Player` without the allocation/lifecycle machinery.
    #[cfg(test)]
    pub fn for_test(player_id: PlayerId, endpoint: ConnectionHandle) -> Self {
        Self::new(player_id, endpoint)
    }
}

/// A process-wide, thread-safe handle to one player record. Mutation goes through the
/// [`Mutex`]; holding it across a call that re-enters the registry risks deadlock, the same
/// hazard the upstream engine documents for `AtomicRefCell` double-borrows.
pub type PlayerHandle = Arc<Mutex<Player>>;

/// Allocates and indexes players, exposing a reader/writer discipline: [`lock`](Self::lock)
/// yields a snapshot-consistent read view for iteration; [`allocate_player`](Self::allocate_player)
/// and [`free_player`](Self::free_player) require exclusive access and must not be called
/// while any reader holds the lock (§4.3, §5).
#[derive(Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<PlayerId, PlayerHandle>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh player id and inserts a new `Connected` record.
    pub fn allocate_player(&self, endpoint: ConnectionHandle) -> PlayerHandle {
        let mut writer = self.players.write().unwrap();
        let player_id = loop {
            let candidate = PlayerId::generate();
            if !writer.contains_key(&candidate) {
                break candidate;
            }
        };
        let mut player = Player::new(player_id, endpoint);
        player.lifecycle = PlayerLifecycle::Connected;
        let handle = Arc::new(Mutex::new(player));
        writer.insert(player_id, Arc::clone(&handle));
        handle
    }

    /// Removes a player. Only valid once the player's lifecycle has reached a terminal state.
    pub fn free_player(&self, player_id: PlayerId) {
        let mut writer = self.players.write().unwrap();
        if let Some(handle) = writer.get(&player_id) {
            let terminal = handle.lock().unwrap().lifecycle.is_terminal();
            debug_assert!(terminal, "freeing a player outside a terminal lifecycle state");
        }
        writer.remove(&player_id);
    }

    pub fn get(&self, player_id: PlayerId) -> Option<PlayerHandle> {
        self.players.read().unwrap().get(&player_id).cloned()
    }

    /// Acquires the reader-style guard. All iteration happens within the lock's lifetime;
    /// entries added by a concurrent `allocate_player` are not visible until the guard drops
    /// and a fresh lock is taken.
    pub fn lock(&self) -> RwLockReadGuard<'_, HashMap<PlayerId, PlayerHandle>> {
        self.players.read().unwrap()
    }

    pub fn len(&self) -> usize {
        self.players.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_requires_terminal_state() {
        let registry = PlayerRegistry::new();
        let handle = registry.allocate_player(ConnectionHandle(1));
        let player_id = handle.lock().unwrap().player_id;

        assert_eq!(registry.len(), 1);

        handle.lock().unwrap().lifecycle = PlayerLifecycle::TimeWait {
            reason: TimeWaitReason::NormalDisconnect,
        };
        registry.free_player(player_id);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn lock_snapshot_excludes_concurrent_inserts() {
        let registry = PlayerRegistry::new();
        registry.allocate_player(ConnectionHandle(1));

        let guard = registry.lock();
        assert_eq!(guard.len(), 1);
        drop(guard);

        registry.allocate_player(ConnectionHandle(2));
        assert_eq!(registry.lock().len(), 2);
    }

    #[test]
    fn has_current_arena_matches_invariant_states() {
        assert!(PlayerLifecycle::Playing.has_current_arena());
        assert!(!PlayerLifecycle::LoggedIn.has_current_arena());
        assert!(!PlayerLifecycle::Uninitialized.has_current_arena());
    }
}
