// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A fixed-size pool of OS threads for blocking work (persistence round-trips, DNS, file
//! reads) that must never run on the mainloop thread. Results are posted back through an
//! MPSC queue; the mainloop drains it once per tick and applies each completion as a fresh
//! task, never inline inside the handler that spawned the work.

use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A boxed continuation, queued to run on the mainloop thread on the next [`WorkerPool::drain`].
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    job_tx: Sender<Job>,
    continuation_tx: Sender<Continuation>,
    continuation_rx: Receiver<Continuation>,
}

impl WorkerPool {
    /// Spawns `threads` worker threads (defaulting to the number of logical CPUs if `None`).
    pub fn new(threads: Option<usize>) -> Self {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (continuation_tx, continuation_rx) = mpsc::channel::<Continuation>();

        let job_rx = Arc::new(Mutex::new(job_rx));
        for _ in 0..threads {
            let job_rx = Arc::clone(&job_rx);
            thread::spawn(move || loop {
                let job = {
                    let lock = job_rx.lock().unwrap();
                    lock.recv()
                };
                match job {
                    Ok(job) => {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("worker pool job panicked");
                        }
                    }
                    Err(_) => break,
                }
            });
        }

        Self {
            job_tx,
            continuation_tx,
            continuation_rx,
        }
    }

    /// Submits blocking `work`; when it finishes, `on_complete` is queued to run on the
    /// mainloop thread on a subsequent [`Self::drain`] call, never synchronously.
    pub fn submit<T, F, C>(&self, work: F, on_complete: C)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let continuation_tx = self.continuation_tx.clone();
        let job: Job = Box::new(move || {
            let result = work();
            let _ = continuation_tx.send(Box::new(move || on_complete(result)));
        });
        if self.job_tx.send(job).is_err() {
            error!("worker pool job queue is closed");
        }
    }

    /// Runs every continuation that has completed since the last drain. Called once per
    /// mainloop tick; never blocks.
    pub fn drain(&self) {
        loop {
            match self.continuation_rx.try_recv() {
                Ok(continuation) => continuation(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}
