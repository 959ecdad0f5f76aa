// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The mainloop (§4.2, §9): the single cooperative tick that drives the timer service, drains
//! worker-pool continuations, and reaps idle arenas. Everything here runs on one thread; a
//! handler that needs to block submits work to the [`WorkerPool`] and resumes through a
//! continuation queued for the *next* tick, never inline — "observable mainloop ordering".

use crate::arena::{Arena, ArenaManager, ArenaModule};
use crate::timer::TimerService;
use server_util::worker_pool::WorkerPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How often idle arenas are swept for teardown. Independent of the tick rate so a slow
/// tick rate doesn't starve reaping and a fast one doesn't waste cycles re-scanning.
const ARENA_REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Fired once per tick on every live arena's broker, after the timer service advances, with
/// the arena already locked so the handler can reach its slot state directly. Lets an attached
/// [`ArenaModule`](crate::arena::ArenaModule) drive its own countdowns/schedules (KOTH, the
/// speed game, periodic reward) without registering a `TimerService` entry per arena — see
/// `crate::modules`.
pub type ArenaTick = dyn Fn(&mut Arena) + Send + Sync;

/// Ties the timer service, arena manager, and worker pool into one deterministic tick.
/// Construction order matters only in that `timers` must be mutably borrowed exclusively by
/// the mainloop thread; nothing here is `Sync` by accident.
pub struct Mainloop {
    pub timers: Mutex<TimerService>,
    pub arenas: Arc<ArenaManager>,
    pub workers: WorkerPool,
    arena_modules: Vec<Arc<dyn ArenaModule>>,
    last_reap: Mutex<Option<Instant>>,
    shutdown: AtomicBool,
}

impl Mainloop {
    pub fn new(arenas: Arc<ArenaManager>, workers: WorkerPool, arena_modules: Vec<Arc<dyn ArenaModule>>) -> Self {
        Self {
            timers: Mutex::new(TimerService::new()),
            arenas,
            workers,
            arena_modules,
            last_reap: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Runs one tick: drain worker-posted continuations first (so their effects are visible
    /// to this tick's timers, but never to the handler that submitted them), advance timers,
    /// then periodically reap idle arenas.
    pub fn tick(&self, now: Instant) {
        self.workers.drain();
        self.timers.lock().unwrap().tick();

        for name in self.arenas.names() {
            if let Some(arena) = self.arenas.get(name) {
                let mut arena = arena.lock().unwrap();
                let broker = Arc::clone(&arena.broker);
                broker.fire::<ArenaTick>(|handler| handler(&mut arena));
            }
        }

        let mut last_reap = self.last_reap.lock().unwrap();
        let due = last_reap.map(|at| now.duration_since(at) >= ARENA_REAP_INTERVAL).unwrap_or(true);
        if due {
            self.arenas.reap_idle(&self.arena_modules, now);
            *last_reap = Some(now);
        }
    }

    /// Requests the run loop stop after the current tick. Checked by [`Self::is_shutting_down`].
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs ticks at a fixed cadence until [`Self::request_shutdown`] is called. Sleeps the
    /// remainder of each tick period rather than busy-waiting; a tick that overruns its period
    /// is not compensated for (no catch-up bursts), matching the single-threaded cooperative
    /// model of §4.2 that assumes handlers never block long enough to matter.
    pub fn run(&self, tick_period: Duration) {
        while !self.is_shutting_down() {
            let started = Instant::now();
            self.tick(started);
            let elapsed = started.elapsed();
            if let Some(remaining) = tick_period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use common_util::ticks::Ticks;
    use std::sync::atomic::AtomicUsize;

    fn mainloop() -> Mainloop {
        let global = Broker::new_root();
        let arenas = Arc::new(ArenaManager::new(global));
        Mainloop::new(arenas, WorkerPool::new(Some(1)), Vec::new())
    }

    #[test]
    fn tick_advances_registered_timers() {
        let mainloop = mainloop();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_timer = Arc::clone(&fired);
        mainloop.timers.lock().unwrap().set_timer(
            move || {
                fired_for_timer.fetch_add(1, Ordering::SeqCst);
                false
            },
            Ticks::ZERO,
            Ticks::ZERO,
            crate::timer::TimerKey(1),
        );

        mainloop.tick(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tick_drains_worker_continuations_before_advancing_timers() {
        let mainloop = mainloop();
        let done = Arc::new(AtomicBool::new(false));
        let done_for_continuation = Arc::clone(&done);
        mainloop.workers.submit(
            || 1 + 1,
            move |result: i32| {
                assert_eq!(result, 2);
                done_for_continuation.store(true, Ordering::SeqCst);
            },
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            mainloop.tick(Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn tick_fires_arena_tick_on_every_live_arena() {
        let global = Broker::new_root();
        let arenas = Arc::new(ArenaManager::new(Arc::clone(&global)));
        let modules: Vec<Arc<dyn ArenaModule>> = Vec::new();
        let arena = arenas.get_or_create(core_protocol::name::ArenaName::new("turf"), &modules);
        let broker = Arc::clone(&arena.lock().unwrap().broker);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_handler = Arc::clone(&fired);
        broker.register_callback::<ArenaTick>(Arc::new(move |_arena: &mut Arena| {
            fired_for_handler.fetch_add(1, Ordering::SeqCst);
        }));

        let mainloop = Mainloop::new(arenas, WorkerPool::new(Some(1)), Vec::new());
        mainloop.tick(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_shutdown_is_observed() {
        let mainloop = mainloop();
        assert!(!mainloop.is_shutting_down());
        mainloop.request_shutdown();
        assert!(mainloop.is_shutting_down());
    }
}
