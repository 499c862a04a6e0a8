// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-request blocking handle.
//!
//! A `Synchronizer` is created by the thread that issues a request and
//! resolved by whichever thread delivers the correlated response. Its own
//! lock is independent of the owning reference's lock: the reference lock is
//! always released before the synchronizer is touched.
//!
//! # Architecture
//! ```text
//! caller thread                         delivery thread
//! ------------------------------        ------------------------------
//! ref.lock(); slot = new sync
//! ref.unlock(); send request  ----->    response arrives
//! sync.await_result()                   ref.lock(); take slot; unlock
//!   (condvar wait, sliced)   <-----     sync.complete(value)
//! ```

use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What a waiter observes when its wait ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// Request succeeded.
    Ready(T),
    /// Request failed (fault, transmission error, timeout, exhaustion).
    Failed(Error),
    /// A newer synchronizer replaced this one; re-fetch it from the owner.
    Superseded,
}

#[derive(Debug)]
enum Resolution<T> {
    Pending,
    Ready(T),
    Failed(Error),
    Superseded,
}

type Observer<T> = Box<dyn FnOnce(WaitOutcome<T>) + Send>;

struct Slot<T> {
    resolution: Resolution<T>,
    observers: Vec<Observer<T>>,
}

/// Blocking result cell with a metadata-version snapshot.
///
/// Exactly one resolution path wins: `complete`, `fail` or `supersede`.
/// Later calls are ignored and return `false`.
pub struct Synchronizer<T> {
    expected_metadata_version: u64,
    created: Instant,
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T: Clone> Synchronizer<T> {
    /// New pending synchronizer issued against `expected_metadata_version`.
    pub fn new(expected_metadata_version: u64) -> Self {
        Self {
            expected_metadata_version,
            created: Instant::now(),
            slot: Mutex::new(Slot {
                resolution: Resolution::Pending,
                observers: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Metadata version of the owning reference when the request was issued.
    pub fn expected_metadata_version(&self) -> u64 {
        self.expected_metadata_version
    }

    /// Time since creation.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.slot.lock().resolution, Resolution::Pending)
    }

    /// Resolve with a result.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Resolution::Ready(value))
    }

    /// Resolve with an error.
    pub fn fail(&self, error: Error) -> bool {
        self.resolve(Resolution::Failed(error))
    }

    /// Mark as replaced by a newer synchronizer.
    pub fn supersede(&self) -> bool {
        self.resolve(Resolution::Superseded)
    }

    fn resolve(&self, resolution: Resolution<T>) -> bool {
        let (observers, outcome) = {
            let mut slot = self.slot.lock();
            if !matches!(slot.resolution, Resolution::Pending) {
                return false;
            }
            slot.resolution = resolution;
            self.cond.notify_all();
            (std::mem::take(&mut slot.observers), Self::outcome_of(&slot.resolution))
        };
        // Observers run on the resolving thread, after the slot lock is gone.
        if let Some(outcome) = outcome {
            for observer in observers {
                observer(outcome.clone());
            }
        }
        true
    }

    /// Run `observer` once the synchronizer is resolved.
    ///
    /// Runs immediately on the calling thread if already resolved,
    /// otherwise on the thread that resolves it.
    pub fn on_resolved<F>(&self, observer: F)
    where
        F: FnOnce(WaitOutcome<T>) + Send + 'static,
    {
        let mut slot = self.slot.lock();
        match Self::outcome_of(&slot.resolution) {
            Some(outcome) => {
                drop(slot);
                observer(outcome);
            }
            None => slot.observers.push(Box::new(observer)),
        }
    }

    /// Current outcome, `None` while pending.
    pub fn try_outcome(&self) -> Option<WaitOutcome<T>> {
        Self::outcome_of(&self.slot.lock().resolution)
    }

    /// Block until resolved.
    ///
    /// Waits in slices of `max_wait`; a slice that ends while still pending
    /// is retried up to `max_retries` times, then the wait fails with
    /// [`Error::Timeout`]. The synchronizer itself stays pending: the owner
    /// decides whether to abandon it.
    pub fn await_result(&self, max_wait: Duration, max_retries: u32) -> WaitOutcome<T> {
        crate::trace_fn!("Synchronizer::await_result");
        let slices = max_retries.max(1);
        let mut slot = self.slot.lock();
        for attempt in 0..slices {
            if let Some(outcome) = Self::outcome_of(&slot.resolution) {
                return outcome;
            }
            let timed_out = self.cond.wait_for(&mut slot, max_wait).timed_out();
            if timed_out && matches!(slot.resolution, Resolution::Pending) {
                log::debug!(
                    "[sync] wait slice {} of {} expired, still pending",
                    attempt + 1,
                    slices
                );
            }
        }
        Self::outcome_of(&slot.resolution).unwrap_or(WaitOutcome::Failed(Error::Timeout))
    }

    fn outcome_of(resolution: &Resolution<T>) -> Option<WaitOutcome<T>> {
        match resolution {
            Resolution::Pending => None,
            Resolution::Ready(value) => Some(WaitOutcome::Ready(value.clone())),
            Resolution::Failed(err) => Some(WaitOutcome::Failed(err.clone())),
            Resolution::Superseded => Some(WaitOutcome::Superseded),
        }
    }
}

impl<T> std::fmt::Debug for Synchronizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.slot.lock().resolution {
            Resolution::Pending => "pending",
            Resolution::Ready(_) => "ready",
            Resolution::Failed(_) => "failed",
            Resolution::Superseded => "superseded",
        };
        f.debug_struct("Synchronizer")
            .field("expected_metadata_version", &self.expected_metadata_version)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SLICE: Duration = Duration::from_millis(20);

    #[test]
    fn test_complete_wakes_waiter() {
        let sync = Arc::new(Synchronizer::<u32>::new(7));
        let waiter = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.await_result(Duration::from_secs(5), 1))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(sync.complete(42));
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Ready(42));
        assert_eq!(sync.expected_metadata_version(), 7);
    }

    #[test]
    fn test_first_resolution_wins() {
        let sync = Synchronizer::<u32>::new(0);
        assert!(sync.fail(Error::Timeout));
        assert!(!sync.complete(1));
        assert!(!sync.supersede());
        assert_eq!(sync.try_outcome(), Some(WaitOutcome::Failed(Error::Timeout)));
    }

    #[test]
    fn test_pending_times_out_after_retries() {
        let sync = Synchronizer::<u32>::new(0);
        let start = Instant::now();
        let outcome = sync.await_result(SLICE, 3);
        assert_eq!(outcome, WaitOutcome::Failed(Error::Timeout));
        assert!(start.elapsed() >= SLICE * 3);
        assert!(sync.is_pending());
    }

    #[test]
    fn test_zero_retries_still_waits_one_slice() {
        let sync = Synchronizer::<u32>::new(0);
        let start = Instant::now();
        assert_eq!(sync.await_result(SLICE, 0), WaitOutcome::Failed(Error::Timeout));
        assert!(start.elapsed() >= SLICE);
    }

    #[test]
    fn test_already_resolved_returns_immediately() {
        let sync = Synchronizer::<u32>::new(0);
        sync.supersede();
        let start = Instant::now();
        assert_eq!(sync.await_result(Duration::from_secs(10), 5), WaitOutcome::Superseded);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_all_waiters_see_same_outcome() {
        let sync = Arc::new(Synchronizer::<String>::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || sync.await_result(Duration::from_secs(5), 1))
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        sync.complete("proxy".to_string());
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitOutcome::Ready("proxy".to_string()));
        }
    }

    #[test]
    fn test_observer_runs_on_resolution() {
        let sync = Synchronizer::<u32>::new(0);
        let (tx, rx) = crossbeam::channel::bounded(1);
        sync.on_resolved(move |outcome| tx.send(outcome).unwrap());
        assert!(rx.try_recv().is_err());
        sync.complete(3);
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Ready(3));
    }

    #[test]
    fn test_observer_on_resolved_sync_runs_immediately() {
        let sync = Synchronizer::<u32>::new(0);
        sync.fail(Error::Shutdown);
        let (tx, rx) = crossbeam::channel::bounded(1);
        sync.on_resolved(move |outcome| tx.send(outcome).unwrap());
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Failed(Error::Shutdown));
    }
}
