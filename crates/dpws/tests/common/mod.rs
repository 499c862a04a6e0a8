// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: scripted transport, recording listener, builders.

#![allow(dead_code)]

use dpws::config::FrameworkConfig;
use dpws::reference::Notification;
use dpws::types::{QName, DPWS_COMM_MANAGER_ID};
use dpws::{
    AppSequence, DeviceListener, DeviceReference, DiscoveryMetadata, EndpointIdentity, Error,
    Framework, InboundMessage, Message, MessageBody, ProtocolVersion, Response, ResponseCallback,
    ServiceListener, ServiceReference, Transport, TransportAddress, TransportCandidate,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What the scripted transport does with one outgoing message.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(MessageBody),
    Fault,
    TransmissionError,
    Timeout,
    /// Never answer.
    Silent,
    /// `send_*` returns `Err`.
    SendError,
}

type Handler = dyn Fn(&Message, Option<&TransportCandidate>) -> Reply + Send + Sync;

/// Transport answering from a test-provided script.
pub struct MockTransport {
    handler: RwLock<Arc<Handler>>,
    delay: Mutex<Duration>,
    sent: Mutex<Vec<(Message, Option<TransportCandidate>)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let silent: Arc<Handler> = Arc::new(|_: &Message, _: Option<&TransportCandidate>| Reply::Silent);
        Arc::new(Self {
            handler: RwLock::new(silent),
            delay: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn respond_with<F>(&self, handler: F)
    where
        F: Fn(&Message, Option<&TransportCandidate>) -> Reply + Send + Sync + 'static,
    {
        *self.handler.write() = Arc::new(handler);
    }

    /// Deliver responses from a separate thread after `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn sent(&self) -> Vec<(Message, Option<TransportCandidate>)> {
        self.sent.lock().clone()
    }

    /// Sent messages whose body is `name` (e.g. `"Get"`).
    pub fn sent_named(&self, name: &str) -> Vec<(Message, Option<TransportCandidate>)> {
        self.sent
            .lock()
            .iter()
            .filter(|(m, _)| m.body.name() == name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn answer(
        &self,
        message: Message,
        target: Option<TransportCandidate>,
        callback: Option<Arc<dyn ResponseCallback>>,
    ) -> dpws::Result<()> {
        self.sent.lock().push((message.clone(), target.clone()));
        let handler = Arc::clone(&self.handler.read());
        let response = match handler(&message, target.as_ref()) {
            Reply::SendError => return Err(Error::Transmission("scripted send failure".into())),
            Reply::Silent => return Ok(()),
            Reply::Body(body) => Response::Reply(Message::reply_to(&message, body)),
            Reply::Fault => Response::Fault {
                code: "s12:Receiver".into(),
                reason: "scripted fault".into(),
            },
            Reply::TransmissionError => Response::TransmissionError("scripted".into()),
            Reply::Timeout => Response::Timeout,
        };
        let Some(callback) = callback else {
            return Ok(());
        };
        let delay = *self.delay.lock();
        if delay.is_zero() {
            callback.on_response(&message, response);
        } else {
            thread::spawn(move || {
                thread::sleep(delay);
                callback.on_response(&message, response);
            });
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn comm_manager_id(&self) -> &str {
        DPWS_COMM_MANAGER_ID
    }

    fn send_unicast(
        &self,
        message: Message,
        target: &TransportCandidate,
        callback: Arc<dyn ResponseCallback>,
    ) -> dpws::Result<()> {
        self.answer(message, Some(target.clone()), Some(callback))
    }

    fn send_multicast(
        &self,
        message: Message,
        _domains: &[String],
        callback: Option<Arc<dyn ResponseCallback>>,
    ) -> dpws::Result<()> {
        self.answer(message, None, callback)
    }
}

/// Listener recording notification names in arrival order.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Notification>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn count(&self, n: Notification) -> usize {
        self.seen.lock().iter().filter(|s| **s == n).count()
    }

    /// Wait until `n` has been delivered at least `times` times.
    pub fn wait_for(&self, n: Notification, times: usize) -> bool {
        wait_until(Duration::from_secs(2), || self.count(n) >= times)
    }

    fn push(&self, n: Notification) {
        self.seen.lock().push(n);
    }
}

impl DeviceListener for Recorder {
    fn device_running(&self, _device: &DeviceReference) {
        self.push(Notification::Running);
    }
    fn device_built_up(&self, _device: &DeviceReference) {
        self.push(Notification::BuiltUp);
    }
    fn device_bye(&self, _device: &DeviceReference) {
        self.push(Notification::Bye);
    }
    fn device_changed(&self, _device: &DeviceReference) {
        self.push(Notification::Changed);
    }
    fn device_communication_error(&self, _device: &DeviceReference) {
        self.push(Notification::CommunicationError);
    }
    fn device_completely_discovered(&self, _device: &DeviceReference) {
        self.push(Notification::CompletelyDiscovered);
    }
}

impl ServiceListener for Recorder {
    fn service_running(&self, _service: &ServiceReference) {
        self.push(Notification::Running);
    }
    fn service_built_up(&self, _service: &ServiceReference) {
        self.push(Notification::BuiltUp);
    }
    fn service_changed(&self, _service: &ServiceReference) {
        self.push(Notification::Changed);
    }
    fn service_bye(&self, _service: &ServiceReference) {
        self.push(Notification::Bye);
    }
    fn service_communication_error(&self, _service: &ServiceReference) {
        self.push(Notification::CommunicationError);
    }
    fn service_completely_discovered(&self, _service: &ServiceReference) {
        self.push(Notification::CompletelyDiscovered);
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Short waits, a single protocol version, fast watchdog.
pub fn test_config() -> FrameworkConfig {
    FrameworkConfig::default()
        .with_match_wait(Duration::from_millis(150))
        .with_max_wait_retries(2)
        .with_supported_versions(vec![ProtocolVersion::Dpws2009])
        .with_watchdog_interval(Duration::from_millis(50))
        .with_shutdown_drain(Duration::from_millis(200))
}

pub fn framework(transport: &Arc<MockTransport>, config: FrameworkConfig) -> Framework {
    Framework::builder()
        .config(config)
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .build()
        .expect("framework builds")
}

pub fn ep(name: &str) -> EndpointIdentity {
    EndpointIdentity::new(format!("urn:uuid:{}", name))
}

pub fn candidate(addr: &str) -> TransportCandidate {
    TransportCandidate::new(addr.parse::<TransportAddress>().expect("valid address"))
}

pub fn device_metadata(name: &str, version: u64, addrs: &[&str]) -> DiscoveryMetadata {
    addrs.iter().fold(
        DiscoveryMetadata::new(ep(name), version).with_type(QName::dpws_device()),
        |m, a| m.with_candidate(candidate(a)),
    )
}

pub fn hello(metadata: DiscoveryMetadata, seq: AppSequence) -> InboundMessage {
    let message = Message::new(MessageBody::Hello(metadata))
        .with_version(ProtocolVersion::Dpws2009)
        .with_sequence(seq);
    InboundMessage::new(message, Some("10.0.0.1:3702".parse().expect("socket addr")))
}

pub fn bye(name: &str, seq: AppSequence) -> InboundMessage {
    let message = Message::new(MessageBody::Bye(ep(name)))
        .with_version(ProtocolVersion::Dpws2009)
        .with_sequence(seq);
    InboundMessage::new(message, None)
}
