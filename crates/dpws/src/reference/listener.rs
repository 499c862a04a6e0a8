// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference listeners and their delivery queues.
//!
//! Every registered listener owns a FIFO queue. State changes push a
//! notification and, if the queue is idle, schedule one drain job on the
//! worker pool. The drain job delivers in order until the queue is empty,
//! so a listener never sees two notifications concurrently and the thread
//! that detected the change never blocks on listener code.
//!
//! # Thread Safety
//!
//! Listener methods run on worker threads. They must be `Send + Sync` and
//! should return quickly. A panicking listener is logged and skipped.

use super::device::DeviceReference;
use super::service::ServiceReference;
use super::state::Notification;
use crate::runtime::WorkerPool;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callbacks for device reference state changes.
///
/// All methods default to no-ops.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl DeviceListener for Printer {
///     fn device_running(&self, device: &DeviceReference) {
///         println!("{} is up", device.endpoint());
///     }
/// }
///
/// device.add_listener(Arc::new(Printer));
/// ```
pub trait DeviceListener: Send + Sync {
    /// Device announced itself (Hello).
    fn device_running(&self, device: &DeviceReference) {
        let _ = device;
    }

    /// A proxy was built from a Get response.
    fn device_built_up(&self, device: &DeviceReference) {
        let _ = device;
    }

    /// Device sent Bye.
    fn device_bye(&self, device: &DeviceReference) {
        let _ = device;
    }

    /// Metadata version changed; the cached proxy was dropped.
    fn device_changed(&self, device: &DeviceReference) {
        let _ = device;
    }

    /// Every known address failed.
    fn device_communication_error(&self, device: &DeviceReference) {
        let _ = device;
    }

    /// Directed probe returned complete discovery metadata.
    fn device_completely_discovered(&self, device: &DeviceReference) {
        let _ = device;
    }
}

/// Callbacks for service reference state changes.
///
/// All methods default to no-ops.
pub trait ServiceListener: Send + Sync {
    fn service_running(&self, service: &ServiceReference) {
        let _ = service;
    }

    /// A proxy was built from a GetMetadata response.
    fn service_built_up(&self, service: &ServiceReference) {
        let _ = service;
    }

    fn service_bye(&self, service: &ServiceReference) {
        let _ = service;
    }

    fn service_changed(&self, service: &ServiceReference) {
        let _ = service;
    }

    fn service_communication_error(&self, service: &ServiceReference) {
        let _ = service;
    }

    fn service_completely_discovered(&self, service: &ServiceReference) {
        let _ = service;
    }
}

pub(crate) fn deliver_device(listener: &dyn DeviceListener, n: Notification, device: &DeviceReference) {
    match n {
        Notification::Running => listener.device_running(device),
        Notification::BuiltUp => listener.device_built_up(device),
        Notification::Bye => listener.device_bye(device),
        Notification::Changed => listener.device_changed(device),
        Notification::CommunicationError => listener.device_communication_error(device),
        Notification::CompletelyDiscovered => listener.device_completely_discovered(device),
    }
}

pub(crate) fn deliver_service(listener: &dyn ServiceListener, n: Notification, service: &ServiceReference) {
    match n {
        Notification::Running => listener.service_running(service),
        Notification::BuiltUp => listener.service_built_up(service),
        Notification::Bye => listener.service_bye(service),
        Notification::Changed => listener.service_changed(service),
        Notification::CommunicationError => listener.service_communication_error(service),
        Notification::CompletelyDiscovered => listener.service_completely_discovered(service),
    }
}

/// Dispatch function from a notification to a listener method.
pub(crate) type Deliver<L, S> = fn(&L, Notification, &S);

struct QueueState<S> {
    pending: VecDeque<(Notification, Arc<S>)>,
    scheduled: bool,
}

/// FIFO of notifications for one listener.
pub(crate) struct ListenerQueue<L: ?Sized, S> {
    listener: Arc<L>,
    state: Mutex<QueueState<S>>,
    deliver: Deliver<L, S>,
}

impl<L, S> ListenerQueue<L, S>
where
    L: ?Sized + Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn new(listener: Arc<L>, deliver: Deliver<L, S>) -> Self {
        Self {
            listener,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                scheduled: false,
            }),
            deliver,
        }
    }

    /// Queue `n`. A notification equal to the last undelivered one is
    /// coalesced.
    fn push(self: &Arc<Self>, pool: &WorkerPool, n: Notification, subject: Arc<S>) {
        {
            let mut state = self.state.lock();
            if state.pending.back().map(|(last, _)| *last) == Some(n) {
                return;
            }
            state.pending.push_back((n, subject));
            if state.scheduled {
                return;
            }
            state.scheduled = true;
        }

        let queue = Arc::clone(self);
        if pool.execute(move || queue.drain()).is_err() {
            log::debug!("[listener] worker pool stopped, dropping queued notifications");
            let mut state = self.state.lock();
            state.pending.clear();
            state.scheduled = false;
        }
    }

    fn drain(&self) {
        loop {
            let (n, subject) = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        state.scheduled = false;
                        return;
                    }
                }
            };
            let delivered = catch_unwind(AssertUnwindSafe(|| {
                (self.deliver)(&self.listener, n, &subject);
            }));
            if delivered.is_err() {
                log::warn!("[listener] listener panicked on {:?}", n);
            }
        }
    }

    fn is_for(&self, listener: &Arc<L>) -> bool {
        Arc::as_ptr(&self.listener).cast::<()>() == Arc::as_ptr(listener).cast::<()>()
    }
}

/// Registered listeners of one reference.
pub(crate) struct ListenerSet<L: ?Sized, S> {
    queues: Mutex<Vec<Arc<ListenerQueue<L, S>>>>,
    deliver: Deliver<L, S>,
}

impl<L, S> ListenerSet<L, S>
where
    L: ?Sized + Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    pub(crate) fn new(deliver: Deliver<L, S>) -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            deliver,
        }
    }

    /// Register `listener`; registering the same instance twice is a no-op.
    pub(crate) fn add(&self, listener: Arc<L>) -> bool {
        let mut queues = self.queues.lock();
        if queues.iter().any(|q| q.is_for(&listener)) {
            return false;
        }
        queues.push(Arc::new(ListenerQueue::new(listener, self.deliver)));
        true
    }

    pub(crate) fn remove(&self, listener: &Arc<L>) -> bool {
        let mut queues = self.queues.lock();
        let before = queues.len();
        queues.retain(|q| !q.is_for(listener));
        queues.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.lock().len()
    }

    /// Queue `n` for every listener.
    pub(crate) fn notify(&self, pool: &WorkerPool, n: Notification, subject: &Arc<S>) {
        // Snapshot so listener registration is never blocked by delivery.
        let queues: Vec<_> = self.queues.lock().clone();
        for queue in queues {
            queue.push(pool, n, Arc::clone(subject));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    trait Probe: Send + Sync {
        fn seen(&self, n: Notification);
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<Notification>>,
    }

    impl Probe for Recorder {
        fn seen(&self, n: Notification) {
            std::thread::sleep(Duration::from_millis(2));
            self.log.lock().push(n);
        }
    }

    fn deliver(listener: &dyn Probe, n: Notification, _subject: &u32) {
        listener.seen(n);
    }

    fn wait_for(recorder: &Recorder, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.log.lock().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_in_order_delivery() {
        let pool = WorkerPool::new(4);
        let set: ListenerSet<dyn Probe, u32> = ListenerSet::new(deliver);
        let recorder = Arc::new(Recorder::default());
        set.add(recorder.clone());

        let subject = Arc::new(7u32);
        let sequence = [
            Notification::Running,
            Notification::BuiltUp,
            Notification::Changed,
            Notification::Running,
            Notification::Bye,
        ];
        for n in sequence {
            set.notify(&pool, n, &subject);
        }
        wait_for(&recorder, sequence.len());
        assert_eq!(*recorder.log.lock(), sequence.to_vec());
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let set: ListenerSet<dyn Probe, u32> = ListenerSet::new(deliver);
        let recorder: Arc<dyn Probe> = Arc::new(Recorder::default());
        assert!(set.add(Arc::clone(&recorder)));
        assert!(!set.add(Arc::clone(&recorder)));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&recorder));
        assert_eq!(set.len(), 0);
    }
}
