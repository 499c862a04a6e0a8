// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle shared by device and service references.
//!
//! # Architecture
//! ```text
//! resolve_object()           request_full_discovery()      resolve_address()
//!       │                            │                            │
//!       v                            v                            v
//!  build slot ──(no address)──> resolve slot <──(no address)── probe slot
//!       │                            │ ResolveMatches
//!       v                            v
//!  Get / GetMetadata           candidates -> failover policy -> waiting slots
//!       │ reply | failure
//!       v
//!  proxy cached, BUILT_UP  |  next candidate  |  exhausted: Timeout + FAULT_RESET
//! ```
//!
//! Each slot holds at most one in-flight exchange; concurrent callers wait
//! on the same synchronizer. All slot and state mutation happens under the
//! reference lock. Synchronizers are resolved, and listeners notified, only
//! after that lock is released.

use super::failover::{AddressFailoverPolicy, FailoverStep};
use super::listener::ListenerSet;
use super::state::{transition, Notification, ReferenceEvent, ReferenceState};
use super::ReferenceContext;
use crate::error::{Error, Result};
use crate::registry::ReferenceRegistry;
use crate::runtime::FrameworkStats;
use crate::sync::{AddressSynchronizer, ProbeSynchronizer, Synchronizer, WaitOutcome};
use crate::transport::{Message, MessageBody, Response, ResponseCallback};
use crate::types::{AppSequence, DiscoveryMetadata, EndpointIdentity, TransportCandidate};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::super::device::DeviceKind {}
    impl Sealed for super::super::service::ServiceKind {}
}

/// What distinguishes a device reference from a service reference.
///
/// Sealed: implemented by [`DeviceKind`](super::DeviceKind) and
/// [`ServiceKind`](super::ServiceKind) only.
pub trait ReferenceKind: sealed::Sealed + Sized + Send + Sync + 'static {
    /// Proxy built from the metadata response.
    type Proxy: fmt::Debug + Send + Sync + 'static;
    /// Listener trait object.
    type Listener: ?Sized + Send + Sync + 'static;
    /// Kind-specific state kept under the reference lock.
    type Extra: Default + Send + 'static;
    /// What invalidation hands over to [`ReferenceKind::after_invalidate`].
    type Detached: Send;

    /// Log label (`device`, `service`).
    const LABEL: &'static str;

    /// Request that fetches the metadata a proxy is built from.
    fn build_request() -> MessageBody;

    /// Build the proxy from a reply. Called under the reference lock.
    fn build_proxy(
        endpoint: &EndpointIdentity,
        metadata_version: u64,
        extra: &mut Self::Extra,
        reply: Message,
        source: &TransportCandidate,
    ) -> Result<Self::Proxy>;

    /// Route a notification to the matching listener method.
    fn deliver(listener: &Self::Listener, n: Notification, reference: &Reference<Self>);

    /// Addresses were resolved. Called under the reference lock.
    fn on_resolved(extra: &mut Self::Extra) {
        let _ = extra;
    }

    /// Take what must be released when the proxy is dropped. Called under
    /// the reference lock.
    fn detach(extra: &mut Self::Extra) -> Self::Detached;

    /// A new proxy was cached. Called without the reference lock.
    fn after_build(reference: &Reference<Self>, proxy: &Arc<Self::Proxy>) {
        let _ = (reference, proxy);
    }

    /// The proxy was dropped. Called without the reference lock.
    fn after_invalidate(reference: &Reference<Self>, detached: Self::Detached) {
        let _ = (reference, detached);
    }

    /// A caller used the reference. Called without the reference lock.
    fn touched(reference: &Reference<Self>) {
        let _ = reference;
    }
}

/// In-flight exchange. `target == None` while waiting for an address.
struct Exchange<T> {
    sync: Arc<Synchronizer<T>>,
    target: Option<TransportCandidate>,
}

impl<T> Exchange<T> {
    fn new(sync: &Arc<Synchronizer<T>>, target: Option<TransportCandidate>) -> Self {
        Self {
            sync: Arc::clone(sync),
            target,
        }
    }
}

fn owns<T>(slot: &Option<Exchange<T>>, sync: &Arc<Synchronizer<T>>) -> bool {
    slot.as_ref().is_some_and(|e| Arc::ptr_eq(&e.sync, sync))
}

pub(crate) struct Inner<K: ReferenceKind> {
    pub(super) state: ReferenceState,
    pub(super) metadata: DiscoveryMetadata,
    /// An announcement or match has been applied.
    pub(super) metadata_known: bool,
    pub(super) completely_discovered: bool,
    pub(super) failover: AddressFailoverPolicy,
    pub(super) observed_from: Option<IpAddr>,
    pub(super) proxy: Option<Arc<K::Proxy>>,
    pub(super) extra: K::Extra,
    build: Option<Exchange<Arc<K::Proxy>>>,
    probe: Option<Exchange<DiscoveryMetadata>>,
    resolve: Option<Exchange<TransportCandidate>>,
    last_touched: Instant,
}

impl<K: ReferenceKind> Inner<K> {
    fn new(metadata: DiscoveryMetadata, proxy: Option<Arc<K::Proxy>>) -> Self {
        Self {
            state: ReferenceState::Unknown,
            failover: AddressFailoverPolicy::new(metadata.candidates.clone(), None),
            metadata,
            metadata_known: false,
            completely_discovered: false,
            observed_from: None,
            proxy,
            extra: K::Extra::default(),
            build: None,
            probe: None,
            resolve: None,
            last_touched: Instant::now(),
        }
    }

    /// Take build/probe exchanges that still wait for an address.
    fn take_waiting_for_address(&mut self) -> Vec<Handle<K>> {
        let mut waiting = Vec::new();
        if self.build.as_ref().is_some_and(|e| e.target.is_none()) {
            if let Some(e) = self.build.take() {
                waiting.push(Handle::Build(e.sync));
            }
        }
        if self.probe.as_ref().is_some_and(|e| e.target.is_none()) {
            if let Some(e) = self.probe.take() {
                waiting.push(Handle::Probe(e.sync));
            }
        }
        waiting
    }
}

/// Synchronizer of one exchange, tagged by slot.
enum Handle<K: ReferenceKind> {
    Build(Arc<Synchronizer<Arc<K::Proxy>>>),
    Probe(Arc<ProbeSynchronizer>),
    Resolve(Arc<AddressSynchronizer>),
}

impl<K: ReferenceKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        match self {
            Handle::Build(s) => Handle::Build(Arc::clone(s)),
            Handle::Probe(s) => Handle::Probe(Arc::clone(s)),
            Handle::Resolve(s) => Handle::Resolve(Arc::clone(s)),
        }
    }
}

impl<K: ReferenceKind> Handle<K> {
    fn name(&self) -> &'static str {
        match self {
            Handle::Build(_) => "build",
            Handle::Probe(_) => "probe",
            Handle::Resolve(_) => "resolve",
        }
    }

    fn is_current(&self, inner: &Inner<K>) -> bool {
        match self {
            Handle::Build(s) => owns(&inner.build, s),
            Handle::Probe(s) => owns(&inner.probe, s),
            Handle::Resolve(s) => owns(&inner.resolve, s),
        }
    }

    fn clear(&self, inner: &mut Inner<K>) {
        match self {
            Handle::Build(s) if owns(&inner.build, s) => inner.build = None,
            Handle::Probe(s) if owns(&inner.probe, s) => inner.probe = None,
            Handle::Resolve(s) if owns(&inner.resolve, s) => inner.resolve = None,
            _ => {}
        }
    }

    fn retarget(&self, inner: &mut Inner<K>, next: &TransportCandidate) {
        match self {
            Handle::Build(_) => {
                if let Some(e) = inner.build.as_mut() {
                    e.target = Some(next.clone());
                }
            }
            Handle::Probe(_) => {
                if let Some(e) = inner.probe.as_mut() {
                    e.target = Some(next.clone());
                }
            }
            Handle::Resolve(_) => {}
        }
    }

    fn fail(&self, error: Error) -> bool {
        match self {
            Handle::Build(s) => s.fail(error),
            Handle::Probe(s) => s.fail(error),
            Handle::Resolve(s) => s.fail(error),
        }
    }
}

/// Transport callback bound to one exchange.
struct ExchangeCallback<K: ReferenceKind> {
    reference: Weak<Reference<K>>,
    handle: Handle<K>,
    target: Option<TransportCandidate>,
}

impl<K: ReferenceKind> ResponseCallback for ExchangeCallback<K> {
    fn on_response(&self, request: &Message, response: Response) {
        match self.reference.upgrade() {
            Some(reference) => {
                reference.on_response(&self.handle, self.target.as_ref(), request, response)
            }
            None => {
                self.handle.fail(Error::Shutdown);
            }
        }
    }
}

/// Outcome of trying to start (or join) an exchange.
enum Begin<T> {
    Done(Result<T>),
    Wait(Arc<Synchronizer<T>>),
}

/// What to send after the reference lock is released.
enum Dispatch {
    To(TransportCandidate),
    Resolve(Arc<AddressSynchronizer>),
    Nothing,
}

/// Synchronizers superseded by a CHANGED event, plus kind-specific leftovers.
struct Invalidation<K: ReferenceKind> {
    build: Option<Arc<Synchronizer<Arc<K::Proxy>>>>,
    probe: Option<Arc<ProbeSynchronizer>>,
    detached: K::Detached,
}

enum FailureStep<K: ReferenceKind> {
    Stale,
    Fail(Vec<Handle<K>>, Error),
    Retry(TransportCandidate),
    Exhausted(Vec<Handle<K>>, Option<Notification>),
}

/// Device or service reference.
///
/// See [`DeviceReference`](super::DeviceReference) and
/// [`ServiceReference`](super::ServiceReference).
pub struct Reference<K: ReferenceKind> {
    endpoint: EndpointIdentity,
    local: bool,
    pub(super) ctx: Arc<ReferenceContext>,
    pub(super) registry: Weak<ReferenceRegistry>,
    me: Weak<Reference<K>>,
    pub(super) inner: Mutex<Inner<K>>,
    listeners: ListenerSet<K::Listener, Reference<K>>,
}

impl<K: ReferenceKind> Reference<K> {
    pub(crate) fn new_remote(
        ctx: Arc<ReferenceContext>,
        registry: Weak<ReferenceRegistry>,
        endpoint: EndpointIdentity,
    ) -> Arc<Self> {
        let metadata = DiscoveryMetadata::new(endpoint.clone(), 0);
        Self::assemble(ctx, registry, endpoint, false, Inner::new(metadata, None))
    }

    pub(crate) fn new_local(
        ctx: Arc<ReferenceContext>,
        registry: Weak<ReferenceRegistry>,
        metadata: DiscoveryMetadata,
        proxy: K::Proxy,
    ) -> Arc<Self> {
        let endpoint = metadata.endpoint.clone();
        let mut inner = Inner::new(metadata, Some(Arc::new(proxy)));
        inner.state = ReferenceState::Stopped;
        inner.metadata_known = true;
        inner.completely_discovered = true;
        Self::assemble(ctx, registry, endpoint, true, inner)
    }

    fn assemble(
        ctx: Arc<ReferenceContext>,
        registry: Weak<ReferenceRegistry>,
        endpoint: EndpointIdentity,
        local: bool,
        inner: Inner<K>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            endpoint,
            local,
            ctx,
            registry,
            me: me.clone(),
            inner: Mutex::new(inner),
            listeners: ListenerSet::new(K::deliver),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn endpoint(&self) -> &EndpointIdentity {
        &self.endpoint
    }

    /// Owned by this process (never driven by discovery).
    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn state(&self) -> ReferenceState {
        self.inner.lock().state
    }

    /// Copy of the cached discovery metadata.
    pub fn metadata(&self) -> DiscoveryMetadata {
        self.inner.lock().metadata.clone()
    }

    pub fn metadata_version(&self) -> u64 {
        self.inner.lock().metadata.metadata_version
    }

    /// Cached proxy, without building one.
    pub fn cached_proxy(&self) -> Option<Arc<K::Proxy>> {
        self.inner.lock().proxy.clone()
    }

    pub fn is_completely_discovered(&self) -> bool {
        self.inner.lock().completely_discovered
    }

    /// Address the next exchange will use.
    pub fn preferred_candidate(&self) -> Option<TransportCandidate> {
        self.inner.lock().failover.current().cloned()
    }

    /// Remaining candidates in try order.
    pub fn candidates(&self) -> Vec<TransportCandidate> {
        self.inner.lock().failover.candidates().to_vec()
    }

    /// Source address of the first announcement.
    pub fn observed_from(&self) -> Option<IpAddr> {
        self.inner.lock().observed_from
    }

    /// Time since the reference was last used or announced.
    pub fn idle_time(&self) -> Duration {
        self.inner.lock().last_touched.elapsed()
    }

    pub fn touch(&self) {
        self.inner.lock().last_touched = Instant::now();
    }

    pub fn has_pending_exchanges(&self) -> bool {
        let inner = self.inner.lock();
        inner.build.is_some() || inner.probe.is_some() || inner.resolve.is_some()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a listener. Returns false if it was already registered.
    pub fn add_listener(&self, listener: Arc<K::Listener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<K::Listener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&self, notification: Option<Notification>) {
        let (Some(n), Some(me)) = (notification, self.me.upgrade()) else {
            return;
        };
        self.listeners.notify(&self.ctx.pool, n, &me);
    }

    // ========================================================================
    // Blocking operations
    // ========================================================================

    /// Return the proxy, building it if needed and `build_if_absent`.
    ///
    /// Concurrent callers share one in-flight request. Without a known
    /// address a Resolve is sent first. Fails with [`Error::Timeout`] when
    /// the wait budget runs out or every address failed.
    pub fn resolve_object(&self, build_if_absent: bool) -> Result<Option<Arc<K::Proxy>>> {
        crate::trace_fn!("Reference::resolve_object");
        K::touched(self);
        if !build_if_absent {
            let mut inner = self.inner.lock();
            inner.last_touched = Instant::now();
            return Ok(inner.proxy.clone());
        }
        self.await_converged(Self::begin_build, Self::abandon_build)
            .map(Some)
    }

    /// Directed Probe for complete discovery metadata.
    pub fn request_full_discovery(&self) -> Result<DiscoveryMetadata> {
        crate::trace_fn!("Reference::request_full_discovery");
        K::touched(self);
        self.await_converged(Self::begin_probe, Self::abandon_probe)
    }

    /// Non-blocking form of [`Reference::request_full_discovery`].
    ///
    /// The result is sent from the thread that completes the probe. A probe
    /// that never completes is failed by the registry watchdog once it is
    /// older than the wait ceiling.
    pub fn request_full_discovery_async(&self) -> Receiver<Result<DiscoveryMetadata>> {
        K::touched(self);
        let (tx, rx) = channel::bounded(1);
        match self.me.upgrade() {
            Some(me) => me.chain_full_discovery(tx, 0),
            None => {
                let _ = tx.send(Err(Error::Shutdown));
            }
        }
        rx
    }

    /// Preferred transport address, resolving one if none is known.
    pub fn resolve_address(&self) -> Result<TransportCandidate> {
        crate::trace_fn!("Reference::resolve_address");
        self.await_converged(Self::begin_resolve, Self::abandon_resolve)
    }

    fn chain_full_discovery(self: Arc<Self>, tx: Sender<Result<DiscoveryMetadata>>, superseded: u32) {
        let sync = match self.begin_probe() {
            Begin::Done(result) => {
                let _ = tx.send(result);
                return;
            }
            Begin::Wait(sync) => sync,
        };
        let budget = self.ctx.config.load().max_wait_retries;
        sync.on_resolved(move |outcome| match outcome {
            WaitOutcome::Ready(metadata) => {
                let _ = tx.send(Ok(metadata));
            }
            WaitOutcome::Failed(err) => {
                let _ = tx.send(Err(err.surfaced()));
            }
            WaitOutcome::Superseded if superseded < budget => {
                self.chain_full_discovery(tx, superseded + 1);
            }
            WaitOutcome::Superseded => {
                let _ = tx.send(Err(Error::Timeout));
            }
        });
    }

    /// Wait on the current synchronizer of a slot, following supersession.
    fn await_converged<T, B, A>(&self, begin: B, abandon: A) -> Result<T>
    where
        T: Clone,
        B: Fn(&Self) -> Begin<T>,
        A: Fn(&Self, &Arc<Synchronizer<T>>),
    {
        let (wait, retries) = {
            let cfg = self.ctx.config.load();
            (cfg.match_wait, cfg.max_wait_retries)
        };

        for _ in 0..=retries {
            let sync = match begin(self) {
                Begin::Done(result) => return result,
                Begin::Wait(sync) => sync,
            };
            match sync.await_result(wait, retries) {
                WaitOutcome::Ready(value) => return Ok(value),
                WaitOutcome::Failed(Error::Timeout) if sync.is_pending() => {
                    abandon(self, &sync);
                    // A response may have slipped in before the abandon.
                    return match sync.try_outcome() {
                        Some(WaitOutcome::Ready(value)) => Ok(value),
                        _ => Err(Error::Timeout),
                    };
                }
                WaitOutcome::Failed(err) => return Err(err.surfaced()),
                WaitOutcome::Superseded => {
                    log::debug!(
                        "[{}-ref] {}: synchronizer superseded, re-waiting",
                        K::LABEL,
                        self.endpoint
                    );
                }
            }
        }
        Err(Error::Timeout)
    }

    fn begin_build(&self) -> Begin<Arc<K::Proxy>> {
        let (sync, dispatch) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.last_touched = Instant::now();
            if let Some(proxy) = &inner.proxy {
                return Begin::Done(Ok(Arc::clone(proxy)));
            }
            if self.local {
                return Begin::Done(Err(Error::IllegalState(format!(
                    "local {} {} has no proxy",
                    K::LABEL,
                    self.endpoint
                ))));
            }
            if let Some(exchange) = &inner.build {
                return Begin::Wait(Arc::clone(&exchange.sync));
            }
            let sync = Arc::new(Synchronizer::new(inner.metadata.metadata_version));
            let target = inner.failover.current().cloned();
            inner.build = Some(Exchange::new(&sync, target.clone()));
            (sync, self.dispatch_for(inner, target))
        };

        match dispatch {
            Dispatch::To(target) => self.send_build(&sync, target),
            Dispatch::Resolve(resolve) => self.send_resolve(&resolve),
            Dispatch::Nothing => {}
        }
        Begin::Wait(sync)
    }

    fn begin_probe(&self) -> Begin<DiscoveryMetadata> {
        let (sync, dispatch) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.last_touched = Instant::now();
            if self.local || inner.completely_discovered {
                return Begin::Done(Ok(inner.metadata.clone()));
            }
            if let Some(exchange) = &inner.probe {
                return Begin::Wait(Arc::clone(&exchange.sync));
            }
            let sync = Arc::new(Synchronizer::new(inner.metadata.metadata_version));
            let target = inner.failover.current().cloned();
            inner.probe = Some(Exchange::new(&sync, target.clone()));
            (sync, self.dispatch_for(inner, target))
        };

        match dispatch {
            Dispatch::To(target) => self.send_probe(&sync, target),
            Dispatch::Resolve(resolve) => self.send_resolve(&resolve),
            Dispatch::Nothing => {}
        }
        Begin::Wait(sync)
    }

    fn begin_resolve(&self) -> Begin<TransportCandidate> {
        let sync = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(current) = inner.failover.current() {
                return Begin::Done(Ok(current.clone()));
            }
            if self.local {
                return Begin::Done(Err(Error::IllegalState(format!(
                    "local {} {} has no transport address",
                    K::LABEL,
                    self.endpoint
                ))));
            }
            if let Some(exchange) = &inner.resolve {
                return Begin::Wait(Arc::clone(&exchange.sync));
            }
            match Self::start_resolve(inner) {
                Some(sync) => sync,
                None => return Begin::Done(Err(Error::IllegalState("resolve slot busy".into()))),
            }
        };
        self.send_resolve(&sync);
        Begin::Wait(sync)
    }

    fn dispatch_for(&self, inner: &mut Inner<K>, target: Option<TransportCandidate>) -> Dispatch {
        match target {
            Some(target) => Dispatch::To(target),
            None => Self::start_resolve(inner).map_or(Dispatch::Nothing, Dispatch::Resolve),
        }
    }

    /// Open the resolve slot unless a Resolve is already in flight.
    fn start_resolve(inner: &mut Inner<K>) -> Option<Arc<AddressSynchronizer>> {
        if inner.resolve.is_some() {
            return None;
        }
        let sync = Arc::new(Synchronizer::new(inner.metadata.metadata_version));
        inner.resolve = Some(Exchange::new(&sync, None));
        Some(sync)
    }

    fn abandon_build(&self, sync: &Arc<Synchronizer<Arc<K::Proxy>>>) {
        self.abandon(Handle::Build(Arc::clone(sync)));
    }

    fn abandon_probe(&self, sync: &Arc<ProbeSynchronizer>) {
        self.abandon(Handle::Probe(Arc::clone(sync)));
    }

    fn abandon_resolve(&self, sync: &Arc<AddressSynchronizer>) {
        self.abandon(Handle::Resolve(Arc::clone(sync)));
    }

    /// A waiter ran out of budget: drop the exchange so the next caller
    /// starts over, and fail the remaining waiters.
    fn abandon(&self, handle: Handle<K>) {
        let mut failed = vec![handle.clone()];
        {
            let mut inner = self.inner.lock();
            if handle.is_current(&inner) {
                handle.clear(&mut inner);
                if matches!(handle, Handle::Resolve(_)) {
                    failed.extend(inner.take_waiting_for_address());
                }
            }
        }
        log::debug!(
            "[{}-ref] {}: {} exchange abandoned after wait budget",
            K::LABEL,
            self.endpoint,
            handle.name()
        );
        for h in failed {
            h.fail(Error::Timeout);
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    fn callback(&self, handle: Handle<K>, target: Option<TransportCandidate>) -> Arc<dyn ResponseCallback> {
        Arc::new(ExchangeCallback {
            reference: self.me.clone(),
            handle,
            target,
        })
    }

    fn send_build(&self, sync: &Arc<Synchronizer<Arc<K::Proxy>>>, target: TransportCandidate) {
        let message = Message::new(K::build_request()).with_to(self.endpoint.clone());
        self.send_unicast(Handle::Build(Arc::clone(sync)), message, target);
    }

    fn send_probe(&self, sync: &Arc<ProbeSynchronizer>, target: TransportCandidate) {
        let message = Message::new(MessageBody::Probe {
            types: BTreeSet::new(),
        })
        .with_to(self.endpoint.clone());
        self.send_unicast(Handle::Probe(Arc::clone(sync)), message, target);
    }

    fn send_unicast(&self, handle: Handle<K>, message: Message, target: TransportCandidate) {
        let callback = self.callback(handle.clone(), Some(target.clone()));
        if let Err(e) = self.ctx.dispatcher.send_unicast(message, &target, callback) {
            self.exchange_failed(&handle, Some(&target), e);
        }
    }

    fn send_resolve(&self, sync: &Arc<AddressSynchronizer>) {
        let handle = Handle::Resolve(Arc::clone(sync));
        let message = Message::new(MessageBody::Resolve(self.endpoint.clone()));
        let callback = self.callback(handle.clone(), None);
        if let Err(e) = self.ctx.dispatcher.send_multicast(message, Some(callback)) {
            self.exchange_failed(&handle, None, e);
        }
    }

    fn resend(&self, handle: &Handle<K>, next: TransportCandidate) {
        match handle {
            Handle::Build(sync) => self.send_build(sync, next),
            Handle::Probe(sync) => self.send_probe(sync, next),
            Handle::Resolve(sync) => self.send_resolve(sync),
        }
    }

    // ========================================================================
    // Responses
    // ========================================================================

    fn on_response(
        &self,
        handle: &Handle<K>,
        target: Option<&TransportCandidate>,
        request: &Message,
        response: Response,
    ) {
        let reply = match response {
            Response::Reply(reply) => reply,
            failure => {
                let error = failure.to_error().unwrap_or(Error::Timeout);
                log::debug!("[{}-ref] {}: {} failed: {}", K::LABEL, self.endpoint, request, error);
                self.exchange_failed(handle, target, error);
                return;
            }
        };

        match (handle, target) {
            (Handle::Build(sync), Some(target)) => self.complete_build(sync, target, reply),
            (Handle::Probe(sync), Some(target)) => self.complete_probe(sync, target, reply),
            (Handle::Resolve(sync), _) => self.complete_resolve(sync, reply),
            (_, None) => log::debug!(
                "[{}-ref] {}: reply {} without target ignored",
                K::LABEL,
                self.endpoint,
                reply
            ),
        }
    }

    fn discard_concurrent(&self, what: &str) {
        FrameworkStats::bump(&self.ctx.stats.concurrent_updates);
        log::debug!(
            "[{}-ref] {}: {} discarded: {}",
            K::LABEL,
            self.endpoint,
            what,
            Error::ConcurrentUpdateDetected
        );
    }

    fn complete_build(&self, sync: &Arc<Synchronizer<Arc<K::Proxy>>>, target: &TransportCandidate, reply: Message) {
        enum Outcome<P> {
            Stale,
            Outdated,
            Rejected(Error),
            Built(Arc<P>, Option<Notification>),
        }

        let version = reply.version;
        let outcome = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !owns(&inner.build, sync) {
                Outcome::Stale
            } else if sync.expected_metadata_version() != inner.metadata.metadata_version {
                inner.build = None;
                Outcome::Outdated
            } else {
                let mut source = target.clone();
                if source.version.is_none() {
                    source.version = version;
                }
                let built = K::build_proxy(
                    &self.endpoint,
                    inner.metadata.metadata_version,
                    &mut inner.extra,
                    reply,
                    &source,
                );
                match built {
                    Err(e) => Outcome::Rejected(e),
                    Ok(proxy) => {
                        let proxy = Arc::new(proxy);
                        if let Some(v) = version {
                            inner.failover.learn_version(target, v);
                        }
                        inner.build = None;
                        inner.proxy = Some(Arc::clone(&proxy));
                        let t = transition(inner.state, ReferenceEvent::GetResponse, true);
                        inner.state = t.next;
                        Outcome::Built(proxy, t.notify)
                    }
                }
            }
        };

        match outcome {
            Outcome::Stale => self.discard_concurrent("response for a replaced request"),
            Outcome::Outdated => {
                self.discard_concurrent("response for an outdated metadata version");
                sync.supersede();
            }
            Outcome::Rejected(e) => self.exchange_failed(&Handle::Build(Arc::clone(sync)), Some(target), e),
            Outcome::Built(proxy, n) => {
                log::debug!("[{}-ref] {}: proxy built", K::LABEL, self.endpoint);
                K::after_build(self, &proxy);
                sync.complete(proxy);
                self.notify(n);
            }
        }
    }

    fn complete_probe(&self, sync: &Arc<ProbeSynchronizer>, target: &TransportCandidate, reply: Message) {
        let reply_name = reply.body.name();
        let version = reply.version;
        let matched = match reply.body {
            MessageBody::ProbeMatches(matches) => matches.into_iter().find(|m| m.endpoint == self.endpoint),
            _ => None,
        };
        let Some(metadata) = matched else {
            let error = Error::MalformedResponse(format!("{} without a match for {}", reply_name, self.endpoint));
            self.exchange_failed(&Handle::Probe(Arc::clone(sync)), Some(target), error);
            return;
        };

        let (result, notes, invalidation) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !owns(&inner.probe, sync) {
                drop(guard);
                self.discard_concurrent("probe match for a replaced request");
                return;
            }
            inner.probe = None;
            if let Some(v) = version {
                inner.failover.learn_version(target, v);
            }
            inner.last_touched = Instant::now();
            let (changed, invalidation) = self.absorb(inner, metadata);
            let mut notes = Vec::with_capacity(2);
            let event = if changed && inner.state != ReferenceState::Unknown {
                ReferenceEvent::Changed
            } else {
                ReferenceEvent::Seen
            };
            let t = transition(inner.state, event, inner.proxy.is_some());
            inner.state = t.next;
            notes.extend(t.notify);
            inner.completely_discovered = true;
            let t = transition(inner.state, ReferenceEvent::CompletelyDiscovered, inner.proxy.is_some());
            inner.state = t.next;
            notes.extend(t.notify);
            (inner.metadata.clone(), notes, invalidation)
        };

        if let Some(invalidation) = invalidation {
            self.finish_invalidation(invalidation);
        }
        sync.complete(result);
        for n in notes {
            self.notify(Some(n));
        }
    }

    fn complete_resolve(&self, sync: &Arc<AddressSynchronizer>, reply: Message) {
        let version = reply.version;
        let candidates = match reply.body {
            MessageBody::ResolveMatches(m) if m.endpoint == self.endpoint && !m.candidates.is_empty() => m.candidates,
            other => {
                let error = Error::MalformedResponse(format!(
                    "{} does not resolve {}",
                    other.name(),
                    self.endpoint
                ));
                self.exchange_failed(&Handle::Resolve(Arc::clone(sync)), None, error);
                return;
            }
        };

        let (current, build, probe, n) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !owns(&inner.resolve, sync) {
                // Further ResolveMatches of the same multicast request.
                return;
            }
            inner.last_touched = Instant::now();

            let mut candidates = candidates;
            for c in candidates.iter_mut().filter(|c| c.version.is_none()) {
                c.version = version;
            }
            inner.metadata.candidates = candidates.clone();
            let observed_from = inner.observed_from;
            inner.failover.reset(candidates, observed_from);
            K::on_resolved(&mut inner.extra);

            let Some(current) = inner.failover.current().cloned() else {
                drop(guard);
                let error = Error::MalformedResponse(format!("no usable address for {}", self.endpoint));
                self.exchange_failed(&Handle::Resolve(Arc::clone(sync)), None, error);
                return;
            };
            inner.resolve = None;
            let t = transition(inner.state, ReferenceEvent::Seen, inner.proxy.is_some());
            inner.state = t.next;
            let build = inner.build.as_mut().filter(|e| e.target.is_none()).map(|e| {
                e.target = Some(current.clone());
                Arc::clone(&e.sync)
            });
            let probe = inner.probe.as_mut().filter(|e| e.target.is_none()).map(|e| {
                e.target = Some(current.clone());
                Arc::clone(&e.sync)
            });
            (current, build, probe, t.notify)
        };

        log::debug!("[{}-ref] {}: resolved to {}", K::LABEL, self.endpoint, current);
        sync.complete(current.clone());
        self.notify(n);
        if let Some(build) = build {
            self.send_build(&build, current.clone());
        }
        if let Some(probe) = probe {
            self.send_probe(&probe, current);
        }
    }

    /// Network failure, fault or local error on an exchange.
    ///
    /// Network failures move to the next candidate; once none is left the
    /// waiters get [`Error::Timeout`] and FAULT_RESET is raised.
    fn exchange_failed(&self, handle: &Handle<K>, target: Option<&TransportCandidate>, error: Error) {
        let step = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !handle.is_current(inner) {
                FailureStep::Stale
            } else if !error.is_network_failure() {
                handle.clear(inner);
                let mut failed = vec![handle.clone()];
                if matches!(handle, Handle::Resolve(_)) {
                    failed.extend(inner.take_waiting_for_address());
                }
                FailureStep::Fail(failed, error.clone())
            } else {
                let next = match target {
                    Some(t) => match inner.failover.mark_failed(t) {
                        FailoverStep::RetryWith(next) => Some(next),
                        FailoverStep::Unchanged => inner.failover.current().cloned(),
                        FailoverStep::Exhausted => None,
                    },
                    None => None,
                };
                match next {
                    Some(next) => {
                        handle.retarget(inner, &next);
                        FailureStep::Retry(next)
                    }
                    None => {
                        handle.clear(inner);
                        let mut failed = vec![handle.clone()];
                        if matches!(handle, Handle::Resolve(_)) {
                            failed.extend(inner.take_waiting_for_address());
                        }
                        let t = transition(inner.state, ReferenceEvent::FaultReset, inner.proxy.is_some());
                        inner.state = t.next;
                        FailureStep::Exhausted(failed, t.notify)
                    }
                }
            }
        };

        match step {
            FailureStep::Stale => log::debug!(
                "[{}-ref] {}: late failure of a replaced {} exchange ignored ({})",
                K::LABEL,
                self.endpoint,
                handle.name(),
                error
            ),
            FailureStep::Fail(failed, error) => {
                log::debug!("[{}-ref] {}: {} failed: {}", K::LABEL, self.endpoint, handle.name(), error);
                for h in failed {
                    h.fail(error.clone());
                }
            }
            FailureStep::Retry(next) => {
                FrameworkStats::bump(&self.ctx.stats.failovers);
                log::info!(
                    "[{}-ref] {}: {} failed ({}), retrying on {}",
                    K::LABEL,
                    self.endpoint,
                    handle.name(),
                    error,
                    next
                );
                self.resend(handle, next);
            }
            FailureStep::Exhausted(failed, n) => {
                FrameworkStats::bump(&self.ctx.stats.addresses_exhausted);
                log::warn!(
                    "[{}-ref] {}: {} failed on every address ({})",
                    K::LABEL,
                    self.endpoint,
                    handle.name(),
                    error
                );
                for h in failed {
                    h.fail(Error::AddressExhausted.surfaced());
                }
                self.notify(n);
            }
        }
    }

    // ========================================================================
    // Announcements
    // ========================================================================

    /// Apply a Hello (or other announcement) for this endpoint.
    ///
    /// Stale sequences are rejected with [`Error::StaleSequence`]. A higher
    /// metadata version raises CHANGED, which drops the cached proxy and
    /// supersedes in-flight exchanges; otherwise SEEN is raised.
    pub fn apply_announcement(
        &self,
        sequence: AppSequence,
        metadata: DiscoveryMetadata,
        source: Option<IpAddr>,
    ) -> Result<()> {
        crate::trace_fn!("Reference::apply_announcement");
        self.check_remote("announcement")?;
        if metadata.endpoint != self.endpoint {
            return Err(Error::IllegalState(format!(
                "announcement for {} applied to {}",
                metadata.endpoint, self.endpoint
            )));
        }
        self.check_sequence(sequence)?;

        let (n, invalidation) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.last_touched = Instant::now();
            if inner.observed_from.is_none() {
                inner.observed_from = source;
            }
            let (changed, invalidation) = self.absorb(inner, metadata);
            // UNKNOWN has no CHANGED transition; an announcement still
            // proves the endpoint is alive.
            let event = if changed && inner.state != ReferenceState::Unknown {
                ReferenceEvent::Changed
            } else {
                ReferenceEvent::Seen
            };
            let t = transition(inner.state, event, inner.proxy.is_some());
            inner.state = t.next;
            (t.notify, invalidation)
        };

        if let Some(invalidation) = invalidation {
            self.finish_invalidation(invalidation);
        }
        self.notify(n);
        Ok(())
    }

    /// Apply a Bye for this endpoint.
    pub fn apply_bye(&self, sequence: AppSequence) -> Result<()> {
        crate::trace_fn!("Reference::apply_bye");
        self.check_remote("bye")?;
        self.check_sequence(sequence)?;

        let n = {
            let mut inner = self.inner.lock();
            inner.last_touched = Instant::now();
            inner.failover.reset(Vec::new(), None);
            let t = transition(inner.state, ReferenceEvent::Bye, inner.proxy.is_some());
            inner.state = t.next;
            t.notify
        };
        self.notify(n);
        Ok(())
    }

    fn check_remote(&self, what: &str) -> Result<()> {
        if self.local {
            return Err(Error::IllegalState(format!(
                "{} applied to local {} {}",
                what,
                K::LABEL,
                self.endpoint
            )));
        }
        Ok(())
    }

    fn check_sequence(&self, sequence: AppSequence) -> Result<()> {
        if self.ctx.sequences.accept(&self.endpoint, sequence) {
            return Ok(());
        }
        FrameworkStats::bump(&self.ctx.stats.stale_sequences);
        Err(Error::StaleSequence)
    }

    /// Merge announced metadata. Returns whether the version increased.
    fn absorb(&self, inner: &mut Inner<K>, metadata: DiscoveryMetadata) -> (bool, Option<Invalidation<K>>) {
        let current = inner.metadata.metadata_version;
        if inner.metadata_known && metadata.metadata_version < current {
            log::debug!(
                "[{}-ref] {}: metadata version {} older than {}, ignored",
                K::LABEL,
                self.endpoint,
                metadata.metadata_version,
                current
            );
            return (false, None);
        }

        let changed = inner.metadata_known && metadata.metadata_version > current;
        let has_candidates = !metadata.candidates.is_empty();
        inner.metadata.merge_from(metadata);
        inner.metadata_known = true;
        if has_candidates {
            let candidates = inner.metadata.candidates.clone();
            let observed_from = inner.observed_from;
            inner.failover.reset(candidates, observed_from);
        }

        if changed {
            log::debug!(
                "[{}-ref] {}: metadata version {} -> {}",
                K::LABEL,
                self.endpoint,
                current,
                inner.metadata.metadata_version
            );
            (true, Some(Self::invalidate_locked(inner)))
        } else {
            (false, None)
        }
    }

    fn invalidate_locked(inner: &mut Inner<K>) -> Invalidation<K> {
        inner.proxy = None;
        inner.completely_discovered = false;
        Invalidation {
            build: inner.build.take().map(|e| e.sync),
            probe: inner.probe.take().map(|e| e.sync),
            detached: K::detach(&mut inner.extra),
        }
    }

    fn finish_invalidation(&self, invalidation: Invalidation<K>) {
        if let Some(build) = invalidation.build {
            build.supersede();
        }
        if let Some(probe) = invalidation.probe {
            probe.supersede();
        }
        K::after_invalidate(self, invalidation.detached);
    }

    /// Drop the cached proxy and supersede in-flight exchanges.
    pub(crate) fn invalidate(&self) {
        let invalidation = Self::invalidate_locked(&mut self.inner.lock());
        self.finish_invalidation(invalidation);
    }

    /// Fail exchanges older than `ceiling`. Returns how many were failed.
    pub(crate) fn expire_stale_exchanges(&self, ceiling: Duration) -> usize {
        let expired: Vec<Handle<K>> = {
            let mut inner = self.inner.lock();
            let mut expired = Vec::new();
            if inner.build.as_ref().is_some_and(|e| e.sync.age() > ceiling) {
                expired.extend(inner.build.take().map(|e| Handle::Build(e.sync)));
            }
            if inner.probe.as_ref().is_some_and(|e| e.sync.age() > ceiling) {
                expired.extend(inner.probe.take().map(|e| Handle::Probe(e.sync)));
            }
            if inner.resolve.as_ref().is_some_and(|e| e.sync.age() > ceiling) {
                expired.extend(inner.resolve.take().map(|e| Handle::Resolve(e.sync)));
            }
            expired
        };
        for handle in &expired {
            log::debug!(
                "[{}-ref] {}: {} exchange expired",
                K::LABEL,
                self.endpoint,
                handle.name()
            );
            handle.fail(Error::Timeout);
        }
        expired.len()
    }

    // ========================================================================
    // Local references
    // ========================================================================

    /// Mark a local reference RUNNING.
    pub fn set_local_running(&self) -> Result<()> {
        self.set_local_state(ReferenceState::Running, Notification::Running)
    }

    /// Mark a local reference STOPPED.
    pub fn set_local_stopped(&self) -> Result<()> {
        self.set_local_state(ReferenceState::Stopped, Notification::Bye)
    }

    fn set_local_state(&self, state: ReferenceState, n: Notification) -> Result<()> {
        if !self.local {
            return Err(Error::IllegalState(format!(
                "{} {} is not local",
                K::LABEL,
                self.endpoint
            )));
        }
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.state != state;
            inner.state = state;
            changed
        };
        if changed {
            self.notify(Some(n));
        }
        Ok(())
    }
}

impl<K: ReferenceKind> fmt::Debug for Reference<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Reference")
            .field("kind", &K::LABEL)
            .field("endpoint", &self.endpoint)
            .field("local", &self.local)
            .field("state", &inner.state)
            .field("metadata_version", &inner.metadata.metadata_version)
            .field("proxy", &inner.proxy.is_some())
            .finish()
    }
}
