// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The FreqManager enforcer advisor chain (§4.5): decides whether a player may enter the
//! game, change ship, or change freq. Advisors are polled through the arena's broker; each
//! may veto. An advisor returning `None` abstains rather than voting "allow".

use crate::broker::Broker;
use crate::config::ConfigStore;
use crate::player::Player;
use crate::ship::ShipMask;
use core_protocol::id::{Freq, Ship};
use core_protocol::name::ArenaName;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single installed rule. Every method is independently optional: abstaining (`None`)
/// leaves the vote to other advisors in the chain.
pub trait FreqEnforcer: Send + Sync {
    fn get_allowable_ships(&self, player: &Player, ship: Ship, freq: Freq) -> Option<ShipMask> {
        let _ = (player, ship, freq);
        None
    }
    fn can_change_to_freq(&self, player: &Player, new_freq: Freq) -> Option<bool> {
        let _ = (player, new_freq);
        None
    }
    fn can_enter_game(&self, player: &Player) -> Option<bool> {
        let _ = player;
        None
    }
    fn is_unlocked(&self, player: &Player) -> Option<bool> {
        let _ = player;
        None
    }
}

/// Polls the advisor chain local-then-parent. Combination rule per operation is fixed by
/// §4.5: `GetAllowableShips` intersects, the three boolean queries AND.
pub struct FreqManager;

impl FreqManager {
    pub fn get_allowable_ships(broker: &Arc<Broker>, player: &Player, ship: Ship, freq: Freq) -> ShipMask {
        broker
            .advisors::<dyn FreqEnforcer>()
            .iter()
            .fold(ShipMask::ALL, |acc, advisor| {
                match advisor.get_allowable_ships(player, ship, freq) {
                    Some(mask) => acc.intersection(mask),
                    None => acc,
                }
            })
    }

    pub fn can_change_to_freq(broker: &Arc<Broker>, player: &Player, new_freq: Freq) -> bool {
        broker
            .advisors::<dyn FreqEnforcer>()
            .iter()
            .all(|advisor| advisor.can_change_to_freq(player, new_freq).unwrap_or(true))
    }

    /// Only meaningful when `player` is currently a spectator, per §4.5.
    pub fn can_enter_game(broker: &Arc<Broker>, player: &Player) -> bool {
        broker
            .advisors::<dyn FreqEnforcer>()
            .iter()
            .all(|advisor| advisor.can_enter_game(player).unwrap_or(true))
    }

    pub fn is_unlocked(broker: &Arc<Broker>, player: &Player) -> bool {
        broker
            .advisors::<dyn FreqEnforcer>()
            .iter()
            .all(|advisor| advisor.is_unlocked(player).unwrap_or(true))
    }
}

/// `LegalShip:ArenaMask` AND `LegalShip:Freq<N>Mask` (falling back to `Freq0Mask`).
pub struct LegalShip {
    config: Arc<dyn ConfigStore>,
}

impl LegalShip {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self { config }
    }
}

impl FreqEnforcer for LegalShip {
    fn get_allowable_ships(&self, player: &Player, _ship: Ship, freq: Freq) -> Option<ShipMask> {
        let arena = player.arena?;
        let arena_mask = ShipMask::from_bits(
            self.config.get_i32(arena, "LegalShip:ArenaMask", ShipMask::ALL.bits() as i32) as u8,
        );
        let freq_n = freq.0.rem_euclid(10000);
        let default_mask = self.config.get_i32(arena, "LegalShip:Freq0Mask", ShipMask::ALL.bits() as i32);
        let key = format!("LegalShip:Freq{}Mask", freq_n);
        let freq_mask = ShipMask::from_bits(self.config.get_i32(arena, &key, default_mask) as u8);
        Some(arena_mask.intersection(freq_mask))
    }
}

/// Refuses a ship change within `Misc:ShipChangeInterval` ticks, and while antiwarped
/// (subject to `Misc:AntiwarpShipChange`/`Misc:AntiwarpFlagShipChange`).
pub struct ShipChange {
    config: Arc<dyn ConfigStore>,
    /// Millisecond timestamp of each player's last accepted ship change, keyed by player id
    /// bits. A real deployment would key this per-player via a data slot; this module keeps
    /// its own table to stay self-contained and independently testable.
    last_change: std::sync::Mutex<std::collections::HashMap<u32, Instant>>,
}

impl ShipChange {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            last_change: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Call once a ship change is actually accepted, so the interval guard has a baseline.
    pub fn record_change(&self, player_id_bits: u32, when: Instant) {
        self.last_change.lock().unwrap().insert(player_id_bits, when);
    }

    fn interval_elapsed(&self, arena: ArenaName, player_id_bits: u32, now: Instant) -> bool {
        let interval_ticks = self.config.get_i32(arena, "Misc:ShipChangeInterval", 0);
        let interval = Duration::from_millis(interval_ticks.max(0) as u64 * 10);
        match self.last_change.lock().unwrap().get(&player_id_bits) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        }
    }
}

impl FreqEnforcer for ShipChange {
    fn get_allowable_ships(&self, player: &Player, _ship: Ship, _freq: Freq) -> Option<ShipMask> {
        let arena = player.arena?;
        let now = Instant::now();
        let player_bits = player.player_id.0.get();

        let is_carrier = player.flags_carried > 0 || player.ball_carried.is_some();
        let antiwarp_gate_enabled = if is_carrier {
            self.config.get_bool(arena, "Misc:AntiwarpFlagShipChange", false)
        } else {
            self.config.get_bool(arena, "Misc:AntiwarpShipChange", false)
        };

        if antiwarp_gate_enabled && player.position.is_antiwarped {
            return Some(self.current_ship_only(player));
        }

        if !self.interval_elapsed(arena, player_bits, now) {
            return Some(self.current_ship_only(player));
        }

        None
    }
}

impl ShipChange {
    fn current_ship_only(&self, player: &Player) -> ShipMask {
        if player.ship.is_spectator() {
            ShipMask::NONE
        } else {
            ShipMask::single(player.ship)
        }
    }
}

/// Always abstains; present so a "spec lock" (server in maintenance) can be simulated by
/// swapping in an always-false variant without touching call sites.
pub struct LockSpec;

impl FreqEnforcer for LockSpec {
    // Every method keeps the trait's default `None`, per §4.5 ("returns None for any query").
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::player::{ConnectionHandle, Player, PlayerLifecycle};
    use core_protocol::id::PlayerId;
    use std::num::NonZeroU32;

    fn test_player(arena: ArenaName, ship: Ship) -> Player {
        let mut player = Player::for_test(PlayerId(NonZeroU32::new(1).unwrap()), ConnectionHandle(1));
        player.arena = Some(arena);
        player.ship = ship;
        player.lifecycle = PlayerLifecycle::Playing;
        player
    }

    #[test]
    fn legal_ship_intersects_arena_and_freq_masks() {
        let config = Arc::new(MemoryConfigStore::new());
        let arena = ArenaName::new("turf");
        config.set(arena, "LegalShip:ArenaMask", (ShipMask::single(Ship::Warbird).union(ShipMask::single(Ship::Javelin))).bits().to_string());
        config.set(arena, "LegalShip:Freq0Mask", ShipMask::single(Ship::Javelin).bits().to_string());

        let enforcer = LegalShip::new(config);
        let player = test_player(arena, Ship::Warbird);
        let mask = enforcer.get_allowable_ships(&player, Ship::Warbird, Freq(0)).unwrap();
        assert_eq!(mask, ShipMask::single(Ship::Javelin));
    }

    #[test]
    fn ship_change_blocked_within_interval() {
        let config = Arc::new(MemoryConfigStore::new());
        let arena = ArenaName::new("turf");
        config.set(arena, "Misc:ShipChangeInterval", "500"); // 5 seconds

        let enforcer = ShipChange::new(config);
        let mut player = test_player(arena, Ship::Warbird);
        let now = Instant::now();
        enforcer.record_change(player.player_id.0.get(), now);

        let mask = enforcer.get_allowable_ships(&player, Ship::Javelin, Freq(0));
        assert_eq!(mask, Some(ShipMask::single(Ship::Warbird)));

        player.ship = Ship::Warbird;
        let _ = player;
    }

    #[test]
    fn ship_change_blocked_while_antiwarped() {
        let config = Arc::new(MemoryConfigStore::new());
        let arena = ArenaName::new("turf");
        config.set(arena, "Misc:AntiwarpShipChange", "1");

        let enforcer = ShipChange::new(config);
        let mut player = test_player(arena, Ship::Warbird);
        player.position.is_antiwarped = true;

        let mask = enforcer.get_allowable_ships(&player, Ship::Javelin, Freq(0));
        assert_eq!(mask, Some(ShipMask::single(Ship::Warbird)));
    }

    #[test]
    fn lock_spec_abstains() {
        let enforcer = LockSpec;
        let player = test_player(ArenaName::new("turf"), Ship::Warbird);
        assert_eq!(enforcer.get_allowable_ships(&player, Ship::Warbird, Freq(0)), None);
        assert_eq!(enforcer.can_enter_game(&player), None);
    }

    #[test]
    fn chain_intersection_is_monotonic_subset() {
        let config = Arc::new(MemoryConfigStore::new());
        let arena = ArenaName::new("turf");
        config.set(arena, "LegalShip:ArenaMask", ShipMask::ALL.bits().to_string());
        config.set(arena, "LegalShip:Freq0Mask", ShipMask::single(Ship::Warbird).bits().to_string());

        let root = Broker::new_root();
        root.register_advisor::<dyn FreqEnforcer>(Arc::new(LegalShip::new(Arc::clone(&config) as Arc<dyn ConfigStore>)));
        root.register_advisor::<dyn FreqEnforcer>(Arc::new(LockSpec));

        let player = test_player(arena, Ship::Warbird);
        let mask = FreqManager::get_allowable_ships(&root, &player, Ship::Warbird, Freq(0));
        assert!(mask.is_subset_of(ShipMask::ALL));
        assert_eq!(mask, ShipMask::single(Ship::Warbird));
    }
}
