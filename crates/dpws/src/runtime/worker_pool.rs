// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size worker pool.
//!
//! Executes asynchronous sends, failover retries and listener
//! notifications. Jobs are queued on an unbounded crossbeam channel and
//! picked up by named worker threads (`dpws-worker-N`).

use crate::error::{Error, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared worker pool.
pub struct WorkerPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawn `threads` workers (minimum 1).
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = channel::unbounded::<Job>();
        let completed = Arc::new(AtomicU64::new(0));

        let workers = (0..threads.max(1))
            .map(|n| {
                let rx = rx.clone();
                let completed = Arc::clone(&completed);
                #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
                let handle = thread::Builder::new()
                    .name(format!("dpws-worker-{}", n))
                    .spawn(move || Self::run(rx, completed))
                    .expect("Failed to spawn worker thread");
                handle
            })
            .collect();

        log::debug!("[worker-pool] started {} workers", threads.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            completed,
        }
    }

    fn run(rx: Receiver<Job>, completed: Arc<AtomicU64>) {
        // Exits once every sender is dropped and the queue is drained.
        for job in rx.iter() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::warn!("[worker-pool] job panicked");
            }
            completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Queue a job.
    ///
    /// Fails with [`Error::Shutdown`] once the pool is stopped.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::Shutdown)?;
        tx.send(Box::new(job)).map_err(|_| Error::Shutdown)
    }

    /// Jobs finished so far (including panicked ones).
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Stop accepting jobs, let queued jobs finish and join the workers.
    ///
    /// Safe to call from a worker thread: that thread is not joined.
    pub fn shutdown(&self) {
        if self.tx.lock().take().is_none() {
            return;
        }
        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("[worker-pool] worker exited with a panic");
            }
        }
        log::debug!("[worker-pool] stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.lock().len())
            .field("running", &self.is_running())
            .finish()
    }
}
