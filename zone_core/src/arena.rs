// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The arena manager: a dictionary of live arenas keyed by name, and the arena lifecycle
//! state machine that drives module attachment at creation and teardown (§4.4).

use crate::broker::Broker;
use crate::slot::{ArenaSlotKind, SlotMap};
use crate::timer::TimerKey;
use core_protocol::name::ArenaName;
use log::{error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// `DoInit0 -> DoInit1 -> DoInit2 -> Running -> DoWriteData -> DoDestroy1 -> DoDestroy2 ->
/// Destroyed`, with `ConfChanged` a valid reentrant event while `Running`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArenaLifecycle {
    DoInit0,
    DoInit1,
    DoInit2,
    Running,
    DoWriteData,
    DoDestroy1,
    DoDestroy2,
    Destroyed,
}

/// Fired at each arena lifecycle boundary. Attached modules subscribe via the arena's broker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArenaAction {
    Create,
    ConfChanged,
    Destroy,
}

/// A name identifying an attached module, for logging and for the "skip and log" failure
/// policy of §4.4.
pub type ModuleName = &'static str;

pub struct Arena {
    pub name: ArenaName,
    pub broker: Arc<Broker>,
    pub lifecycle: ArenaLifecycle,
    pub slots: SlotMap<ArenaSlotKind>,
    pub attached_modules: Vec<ModuleName>,
    /// Players present, for idle-teardown bookkeeping. Updated by the lifecycle engine as
    /// players enter/leave, not derived by scanning the player registry every tick.
    pub player_count: usize,
    pub empty_since: Option<Instant>,
    /// Grouping key this arena's timers were registered under, for bulk cancellation on
    /// destroy.
    pub timer_key: TimerKey,
    /// Encoded packets (goal, periodic reward, speed stats, ...) produced by attached rules
    /// modules, waiting for the (external) network layer to flush to the arena's roster.
    pub outbound: Mutex<Vec<Vec<u8>>>,
}

impl Arena {
    fn new(name: ArenaName, parent: &Arc<Broker>, timer_key: TimerKey) -> Self {
        Self {
            name,
            broker: parent.new_child(),
            lifecycle: ArenaLifecycle::DoInit0,
            slots: SlotMap::new(),
            attached_modules: Vec::new(),
            player_count: 0,
            empty_since: None,
            timer_key,
            outbound: Mutex::new(Vec::new()),
        }
    }

    /// Queues an encoded packet for the network layer to flush to this arena's roster.
    pub fn push_outbound(&self, packet: Vec<u8>) {
        self.outbound.lock().unwrap().push(packet);
    }
}

/// How long an empty arena stays alive before the manager tears it down (§3).
pub const ARENA_IDLE_TEARDOWN: std::time::Duration = std::time::Duration::from_secs(300);

pub type ArenaHandle = Arc<Mutex<Arena>>;

/// Attach/detach hooks a rules module registers so the arena manager can drive module
/// lifecycle without knowing concrete module types. A module that fails `on_attach` causes
/// the arena to skip it and log, per §4.4; a module that panics during `on_detach` is logged
/// and the attachment is forcibly released.
pub trait ArenaModule: Send + Sync {
    fn name(&self) -> ModuleName;
    fn on_attach(&self, arena: &mut Arena) -> bool;
    fn on_detach(&self, arena: &mut Arena);
}

#[derive(Default)]
pub struct ArenaManager {
    global_broker: Option<Arc<Broker>>,
    arenas: RwLock<HashMap<ArenaName, ArenaHandle>>,
    next_timer_key: std::sync::atomic::AtomicU64,
}

impl ArenaManager {
    pub fn new(global_broker: Arc<Broker>) -> Self {
        Self {
            global_broker: Some(global_broker),
            arenas: RwLock::new(HashMap::new()),
            next_timer_key: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Returns the arena with `name`, creating it (running it through `DoInit0..DoInit2`,
    /// attaching `modules`) if it does not already exist.
    pub fn get_or_create(&self, name: ArenaName, modules: &[Arc<dyn ArenaModule>]) -> ArenaHandle {
        if let Some(existing) = self.arenas.read().unwrap().get(&name) {
            return Arc::clone(existing);
        }

        let mut writer = self.arenas.write().unwrap();
        if let Some(existing) = writer.get(&name) {
            return Arc::clone(existing);
        }

        let global = self
            .global_broker
            .as_ref()
            .expect("ArenaManager must be constructed with a global broker");
        let timer_key = TimerKey(
            self.next_timer_key
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        let mut arena = Arena::new(name, global, timer_key);
        arena.lifecycle = ArenaLifecycle::DoInit1;
        arena.lifecycle = ArenaLifecycle::DoInit2;
        for module in modules {
            if module.on_attach(&mut arena) {
                arena.attached_modules.push(module.name());
            } else {
                error!("module {:?} failed to attach to arena {}", module.name(), name);
            }
        }
        arena.lifecycle = ArenaLifecycle::Running;

        let handle = Arc::new(Mutex::new(arena));
        writer.insert(name, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, name: ArenaName) -> Option<ArenaHandle> {
        self.arenas.read().unwrap().get(&name).cloned()
    }

    pub fn names(&self) -> Vec<ArenaName> {
        self.arenas.read().unwrap().keys().copied().collect()
    }

    /// Tears down every arena that has been empty for at least [`ARENA_IDLE_TEARDOWN`].
    pub fn reap_idle(&self, modules: &[Arc<dyn ArenaModule>], now: Instant) {
        let idle: Vec<ArenaName> = {
            let reader = self.arenas.read().unwrap();
            reader
                .iter()
                .filter_map(|(name, handle)| {
                    let arena = handle.lock().unwrap();
                    arena
                        .empty_since
                        .filter(|since| now.duration_since(*since) >= ARENA_IDLE_TEARDOWN)
                        .map(|_| *name)
                })
                .collect()
        };
        for name in idle {
            self.destroy(name, modules);
        }
    }

    /// Runs `DoWriteData -> DoDestroy1 -> DoDestroy2 -> Destroyed`, detaching every module.
    /// A module that panics during detach is logged and forcibly released rather than
    /// propagating, per §4.4.
    pub fn destroy(&self, name: ArenaName, modules: &[Arc<dyn ArenaModule>]) {
        let handle = {
            let mut writer = self.arenas.write().unwrap();
            writer.remove(&name)
        };
        let Some(handle) = handle else { return };
        let mut arena = handle.lock().unwrap();
        arena.lifecycle = ArenaLifecycle::DoWriteData;
        arena.lifecycle = ArenaLifecycle::DoDestroy1;
        for module in modules {
            if arena.attached_modules.contains(&module.name()) {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    module.on_detach(&mut arena);
                }));
                if outcome.is_err() {
                    warn!(
                        "module {:?} panicked during detach from arena {}; forcibly released",
                        module.name(),
                        name
                    );
                }
            }
        }
        arena.attached_modules.clear();
        arena.lifecycle = ArenaLifecycle::DoDestroy2;
        arena.lifecycle = ArenaLifecycle::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopModule;
    impl ArenaModule for NoopModule {
        fn name(&self) -> ModuleName {
            "noop"
        }
        fn on_attach(&self, _arena: &mut Arena) -> bool {
            true
        }
        fn on_detach(&self, _arena: &mut Arena) {}
    }

    struct FailingModule;
    impl ArenaModule for FailingModule {
        fn name(&self) -> ModuleName {
            "failing"
        }
        fn on_attach(&self, _arena: &mut Arena) -> bool {
            false
        }
        fn on_detach(&self, _arena: &mut Arena) {}
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let manager = ArenaManager::new(Broker::new_root());
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::new(NoopModule)];
        let a = manager.get_or_create(ArenaName::new("turf"), &modules);
        let b = manager.get_or_create(ArenaName::new("turf"), &modules);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().unwrap().lifecycle, ArenaLifecycle::Running);
        assert_eq!(a.lock().unwrap().attached_modules, vec!["noop"]);
    }

    #[test]
    fn failing_module_is_skipped_not_fatal() {
        let manager = ArenaManager::new(Broker::new_root());
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::new(FailingModule)];
        let arena = manager.get_or_create(ArenaName::new("x"), &modules);
        assert_eq!(arena.lock().unwrap().lifecycle, ArenaLifecycle::Running);
        assert!(arena.lock().unwrap().attached_modules.is_empty());
    }

    #[test]
    fn destroy_removes_from_dictionary() {
        let manager = ArenaManager::new(Broker::new_root());
        let modules: Vec<Arc<dyn ArenaModule>> = vec![Arc::new(NoopModule)];
        manager.get_or_create(ArenaName::new("x"), &modules);
        manager.destroy(ArenaName::new("x"), &modules);
        assert!(manager.get(ArenaName::new("x")).is_none());
    }
}
