// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The timer service: cooperative timers executed on the mainloop thread (§4.2). No
//! preemption, no blocking; handlers that must block submit work to the
//! [`server_util::worker_pool::WorkerPool`] and resume via a fresh mainloop task instead.

use common_util::ticks::Ticks;

/// Opaque grouping key so unrelated modules can clear their own timers without colliding.
/// Callers derive a stable value for their own key type (e.g. an arena id, or a
/// `(arena_id, purpose)` pair hashed down to a u64).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerKey(pub u64);

type TimerFn = Box<dyn FnMut() -> bool + Send>;

struct TimerEntry {
    handler: TimerFn,
    key: TimerKey,
    /// Ticks remaining until this timer next fires.
    remaining: Ticks,
    period: Ticks,
    /// Registration order, used to break same-tick ties per §4.2's ordering rule.
    sequence: u64,
}

/// Runs entirely on the mainloop thread. `SetTimer`/`ClearTimer` calls arriving from worker
/// threads must be posted through an MPSC queue and drained at the top of a tick before
/// [`TimerService::tick`] runs; this type itself assumes single-threaded access.
#[derive(Default)]
pub struct TimerService {
    timers: Vec<TimerEntry>,
    next_sequence: u64,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a periodic (or one-shot, when `period == Ticks::ZERO`) timer. `handler` runs
    /// on the mainloop thread; returning `false` removes it, `true` keeps it running.
    pub fn set_timer(
        &mut self,
        handler: impl FnMut() -> bool + Send + 'static,
        initial_delay: Ticks,
        period: Ticks,
        key: TimerKey,
    ) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.timers.push(TimerEntry {
            handler: Box::new(handler),
            key,
            remaining: initial_delay,
            period,
            sequence,
        });
    }

    /// Removes every timer registered under `key`. Idempotent.
    pub fn clear_timer(&mut self, key: TimerKey) {
        self.timers.retain(|t| t.key != key);
    }

    /// Advances every timer by one tick, firing those that reach zero. Timers ready in the
    /// same tick fire in registration order, breaking ties by smallest remaining delay (which
    /// is always zero for "ready" timers, so this reduces to pure FIFO among the ready set,
    /// as mandated by §4.2).
    pub fn tick(&mut self) {
        for timer in &mut self.timers {
            timer.remaining = timer.remaining.saturating_sub(Ticks::ONE);
        }

        let mut ready: Vec<usize> = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.remaining == Ticks::ZERO)
            .map(|(i, _)| i)
            .collect();
        ready.sort_by(|&a, &b| {
            self.timers[a]
                .remaining
                .cmp(&self.timers[b].remaining)
                .then_with(|| self.timers[a].sequence.cmp(&self.timers[b].sequence))
        });

        let mut to_remove = Vec::new();
        for i in ready {
            let keep = (self.timers[i].handler)();
            if keep && self.timers[i].period != Ticks::ZERO {
                self.timers[i].remaining = self.timers[i].period;
            } else {
                to_remove.push(i);
            }
        }

        to_remove.sort_unstable_by(|a, b| b.cmp(a));
        for i in to_remove {
            self.timers.remove(i);
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn fires_in_registration_order_when_simultaneously_ready() {
        let mut service = TimerService::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            service.set_timer(
                move || {
                    order.lock().unwrap().push(label);
                    false
                },
                Ticks::ZERO,
                Ticks::ZERO,
                TimerKey(0),
            );
        }

        service.tick();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(service.is_empty());
    }

    #[test]
    fn periodic_timer_reschedules() {
        let mut service = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        service.set_timer(
            move || {
                count2.fetch_add(1, AtomicOrdering::SeqCst);
                true
            },
            Ticks::ZERO,
            Ticks(2),
            TimerKey(1),
        );

        service.tick(); // fires at t=0
        service.tick(); // remaining=1
        service.tick(); // remaining=0, fires
        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn clear_by_key_removes_all_matches() {
        let mut service = TimerService::new();
        for _ in 0..3 {
            service.set_timer(|| true, Ticks(100), Ticks(100), TimerKey(7));
        }
        service.set_timer(|| true, Ticks(100), Ticks(100), TimerKey(8));
        service.clear_timer(TimerKey(7));
        assert_eq!(service.len(), 1);
    }
}
