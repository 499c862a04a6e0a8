// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound message dispatch.
//!
//! # Architecture
//! ```text
//! reference ──> Dispatcher::send_unicast ──> fan-out ──> pool job ──> Transport
//!                                      (per version copy)
//! registry  ──> Dispatcher::send_multicast ─> record id in dedup filter
//!                    │                         inflight += 1
//!                    └─ wait for hand-off ───> pool job ──> Transport
//!                                               inflight -= 1
//! ```
//!
//! Multicast callers block only until a worker has picked the send up.
//! Shutdown waits for the in-flight multicast count to reach zero.

use super::fanout::ProtocolVersionFanout;
use super::interface::{ResponseCallback, SecurityProvider, Transport};
use super::message::{Message, Response};
use crate::config::SharedConfig;
use crate::discovery::DuplicateMessageFilter;
use crate::error::{Error, Result};
use crate::runtime::{FrameworkStats, WorkerPool};
use crate::types::{TransportAddress, TransportCandidate};
use crossbeam::channel;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Count of multicast sends handed to workers but not finished.
#[derive(Debug, Default)]
struct InflightCounter {
    count: Mutex<usize>,
    zero: Condvar,
}

impl InflightCounter {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Block until zero or `timeout`. Returns true when drained.
    fn wait_zero(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Routes outgoing messages to transports through the worker pool.
pub struct Dispatcher {
    transports: HashMap<String, Arc<dyn Transport>>,
    config: SharedConfig,
    pool: Arc<WorkerPool>,
    filter: Arc<DuplicateMessageFilter>,
    security: Option<Arc<dyn SecurityProvider>>,
    stats: Arc<FrameworkStats>,
    inflight: Arc<InflightCounter>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        transports: HashMap<String, Arc<dyn Transport>>,
        config: SharedConfig,
        pool: Arc<WorkerPool>,
        filter: Arc<DuplicateMessageFilter>,
        security: Option<Arc<dyn SecurityProvider>>,
        stats: Arc<FrameworkStats>,
    ) -> Self {
        Self {
            transports,
            config,
            pool,
            filter,
            security,
            stats,
            inflight: Arc::new(InflightCounter::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn has_transport(&self, comm_manager_id: &str) -> bool {
        self.transports.contains_key(comm_manager_id)
    }

    fn transport_for(&self, comm_manager_id: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .get(comm_manager_id)
            .cloned()
            .ok_or_else(|| {
                Error::IllegalState(format!(
                    "no transport for communication manager '{}'",
                    comm_manager_id
                ))
            })
    }

    fn fanout(&self) -> ProtocolVersionFanout {
        ProtocolVersionFanout::new(self.config.load().supported_versions.clone())
    }

    fn secure(&self, message: &mut Message, address: &TransportAddress) {
        if let Some(provider) = &self.security {
            if provider.is_secure(address) {
                message.credential_alias = provider.credential_alias(address);
            }
        }
    }

    /// Send a request to one candidate.
    ///
    /// The candidate's version is used when the message has none; if both
    /// are unknown the request is fanned out. The callback sees exactly one
    /// outcome. `Err` means nothing was sent.
    pub fn send_unicast(
        &self,
        mut message: Message,
        target: &TransportCandidate,
        callback: Arc<dyn ResponseCallback>,
    ) -> Result<()> {
        crate::trace_fn!("Dispatcher::send_unicast");
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        let transport = self.transport_for(&target.comm_manager_id)?;
        if message.version.is_none() {
            message.version = target.version;
        }
        self.secure(&mut message, &target.address);

        let (copies, callback) = self.fanout().prepare(message, callback);
        if copies.len() > 1 {
            FrameworkStats::bump(&self.stats.fanouts);
        }

        for copy in copies {
            FrameworkStats::bump(&self.stats.unicast_sends);
            let transport = Arc::clone(&transport);
            let target = target.clone();
            let cb = Arc::clone(&callback);
            let request = copy.clone();
            let queued = self.pool.execute(move || {
                let request = copy.clone();
                if let Err(e) = transport.send_unicast(copy, &target, Arc::clone(&cb)) {
                    log::debug!("[dispatcher] unicast {} to {} failed: {}", request, target, e);
                    cb.on_response(&request, Response::TransmissionError(e.to_string()));
                }
            });
            if queued.is_err() {
                callback.on_response(&request, Response::TransmissionError("worker pool stopped".into()));
            }
        }
        Ok(())
    }

    /// Send a message to the multicast group of the default communication
    /// manager.
    ///
    /// Every copy's id is recorded in the duplicate filter so looped-back
    /// copies are dropped on receipt.
    pub fn send_multicast(
        &self,
        message: Message,
        callback: Option<Arc<dyn ResponseCallback>>,
    ) -> Result<()> {
        crate::trace_fn!("Dispatcher::send_multicast");
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        let (default_id, handoff) = {
            let cfg = self.config.load();
            (cfg.default_comm_manager.clone(), cfg.multicast_handoff)
        };
        let transport = self.transport_for(&default_id)?;

        let (copies, callback) = match callback {
            Some(cb) => {
                let (copies, cb) = self.fanout().prepare(message, cb);
                (copies, Some(cb))
            }
            None if message.version.is_some() => (vec![message], None),
            None => {
                let copies = self
                    .fanout()
                    .versions()
                    .iter()
                    .map(|v| message.copy_for_version(*v))
                    .collect();
                (copies, None)
            }
        };
        if copies.len() > 1 {
            FrameworkStats::bump(&self.stats.fanouts);
        }

        for copy in copies {
            self.filter.contains_or_add(&copy.id);
            FrameworkStats::bump(&self.stats.multicast_sends);
            self.inflight.begin();

            let (started_tx, started_rx) = channel::bounded::<()>(1);
            let transport = Arc::clone(&transport);
            let inflight = Arc::clone(&self.inflight);
            let cb = callback.clone();
            let queued = self.pool.execute(move || {
                let _ = started_tx.send(());
                let request = copy.clone();
                if let Err(e) = transport.send_multicast(copy, &[], cb.clone()) {
                    log::debug!("[dispatcher] multicast {} failed: {}", request, e);
                    if let Some(cb) = cb {
                        cb.on_response(&request, Response::TransmissionError(e.to_string()));
                    }
                }
                inflight.finish();
            });
            if queued.is_err() {
                self.inflight.finish();
                return Err(Error::Shutdown);
            }
            if started_rx.recv_timeout(handoff).is_err() {
                log::debug!("[dispatcher] multicast hand-off exceeded {:?}", handoff);
            }
        }
        Ok(())
    }

    /// Multicast sends not finished yet.
    pub fn inflight_multicasts(&self) -> usize {
        self.inflight.current()
    }

    /// Refuse new sends and wait for in-flight multicasts.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        let drained = self.inflight.wait_zero(timeout);
        if !drained {
            log::warn!(
                "[dispatcher] {} multicast sends still in flight after {:?}",
                self.inflight.current(),
                timeout
            );
        }
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.transports.keys().collect();
        ids.sort();
        f.debug_struct("Dispatcher")
            .field("transports", &ids)
            .field("secure", &self.security.is_some())
            .field("inflight", &self.inflight.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{share, FrameworkConfig};
    use crate::transport::MessageBody;
    use crate::types::{EndpointIdentity, ProtocolVersion};
    use std::thread;

    #[derive(Default)]
    struct SlowMulticast {
        sent: Mutex<Vec<Message>>,
    }

    impl Transport for SlowMulticast {
        fn comm_manager_id(&self) -> &str {
            "DPWS"
        }

        fn send_unicast(
            &self,
            message: Message,
            _target: &TransportCandidate,
            callback: Arc<dyn ResponseCallback>,
        ) -> Result<()> {
            callback.on_response(&message, Response::Timeout);
            Ok(())
        }

        fn send_multicast(
            &self,
            message: Message,
            _domains: &[String],
            _callback: Option<Arc<dyn ResponseCallback>>,
        ) -> Result<()> {
            thread::sleep(Duration::from_millis(30));
            self.sent.lock().push(message);
            Ok(())
        }
    }

    fn dispatcher(transport: Arc<SlowMulticast>) -> (Dispatcher, Arc<DuplicateMessageFilter>) {
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert("DPWS".into(), transport);
        let filter = Arc::new(DuplicateMessageFilter::new(16));
        let config = FrameworkConfig::default().with_supported_versions(vec![ProtocolVersion::Dpws2009]);
        let dispatcher = Dispatcher::new(
            transports,
            share(config),
            Arc::new(WorkerPool::new(2)),
            Arc::clone(&filter),
            None,
            Arc::new(FrameworkStats::new()),
        );
        (dispatcher, filter)
    }

    #[test]
    fn test_multicast_records_own_id_and_drains() {
        let transport = Arc::new(SlowMulticast::default());
        let (dispatcher, filter) = dispatcher(Arc::clone(&transport));
        let hello = Message::new(MessageBody::Bye(EndpointIdentity::new("urn:uuid:me")))
            .with_version(ProtocolVersion::Dpws2009);
        dispatcher.send_multicast(hello.clone(), None).unwrap();

        assert!(filter.contains(&hello.id));
        assert!(dispatcher.drain(Duration::from_secs(2)));
        assert_eq!(transport.sent.lock().len(), 1);
        assert_eq!(dispatcher.inflight_multicasts(), 0);
        assert_eq!(dispatcher.send_multicast(hello, None), Err(Error::Shutdown));
    }

    #[test]
    fn test_unknown_comm_manager_is_illegal_state() {
        let (dispatcher, _) = dispatcher(Arc::new(SlowMulticast::default()));
        let target = TransportCandidate::new("10.0.0.1:80/x".parse().unwrap()).with_comm_manager("BT");
        let cb: Arc<dyn ResponseCallback> = Arc::new(|_: &Message, _: Response| {});
        assert!(matches!(
            dispatcher.send_unicast(Message::new(MessageBody::Get), &target, cb),
            Err(Error::IllegalState(_))
        ));
    }
}
