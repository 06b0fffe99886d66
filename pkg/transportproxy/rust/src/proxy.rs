// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Transport proxy
//!
//! Binds one device to one upstream transport service. Registry events and
//! relayed upstream events flow through a single [`EventMultiplexer`].
//!
//! Locking: refresh, then registry, then multiplexer. Every registry
//! mutation is published before the registry lock is released.

use crate::clock::DeviceClock;
use crate::device::{DeviceHandle, DeviceState};
use crate::error::{DeviceQueryError, Result};
use crate::multiplexer::{EventFilter, EventMultiplexer, Subscription};
use crate::proto::transport_service_client::TransportServiceClient;
use crate::proto::{self, GetEventsRequest, Process, TimeRequest};
use crate::registry::ProcessRegistry;
use crate::translator;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::transport::Channel;
use tracing::{Instrument, Span, debug, info, info_span, warn};

pub type UpstreamClient = TransportServiceClient<Channel>;

/// Lifecycle of the upstream relay task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Running,
    /// The upstream stream errored; the next subscription restarts it.
    Failed,
    /// The upstream stream ended normally.
    Completed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Idle => write!(f, "idle"),
            RelayState::Running => write!(f, "running"),
            RelayState::Failed => write!(f, "failed"),
            RelayState::Completed => write!(f, "completed"),
        }
    }
}

pub struct TransportProxy {
    device: Arc<dyn DeviceHandle>,
    record: proto::Device,
    upstream: UpstreamClient,
    registry: Mutex<ProcessRegistry>,
    /// Serializes client queries so an older list is never applied last.
    refresh: Mutex<()>,
    hub: Arc<EventMultiplexer>,
    clock: DeviceClock,
    relay: Arc<Mutex<RelayState>>,
    shutdown: CancellationToken,
    disconnected: AtomicBool,
    runtime: Handle,
    span: Span,
}

impl TransportProxy {
    /// Build a proxy around an already translated device record.
    ///
    /// Performs no device I/O; call [`TransportProxy::refresh_clients`] to
    /// seed the registry. Must be called within a tokio runtime.
    pub fn new(
        device: Arc<dyn DeviceHandle>,
        record: proto::Device,
        upstream: UpstreamClient,
        clock: DeviceClock,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()?;
        let span = info_span!(
            "transport_proxy",
            serial = %record.serial,
            device_id = record.device_id
        );
        Ok(Arc::new(Self {
            device,
            registry: Mutex::new(ProcessRegistry::new(&record)),
            refresh: Mutex::new(()),
            record,
            upstream,
            hub: EventMultiplexer::new(),
            clock,
            relay: Arc::new(Mutex::new(RelayState::Idle)),
            shutdown: CancellationToken::new(),
            disconnected: AtomicBool::new(false),
            runtime,
            span,
        }))
    }

    /// Anchor the device clock to the upstream, translate the device and seed
    /// the registry with its current clients.
    pub async fn connect(
        device: Arc<dyn DeviceHandle>,
        mut upstream: UpstreamClient,
    ) -> Result<Arc<Self>> {
        let now_ns = upstream
            .get_current_time(TimeRequest::default())
            .await?
            .into_inner()
            .timestamp_ns;
        let clock = DeviceClock::anchored(now_ns);

        let probe = device.clone();
        let (record, clients) = tokio::task::spawn_blocking(move || {
            let record = translator::device_record(probe.as_ref())?;
            let clients = if probe.is_online()? {
                probe.clients()?
            } else {
                Vec::new()
            };
            Ok::<_, DeviceQueryError>((record, clients))
        })
        .await??;

        let proxy = Self::new(device, record, upstream, clock)?;
        let started = proxy.apply_clients(&clients);
        proxy.span.in_scope(|| {
            info!(processes = started, upstream_time_ns = now_ns, "transport proxy connected");
        });
        Ok(proxy)
    }

    pub fn device(&self) -> &proto::Device {
        &self.record
    }

    pub fn device_handle(&self) -> &Arc<dyn DeviceHandle> {
        &self.device
    }

    /// A client for forwarding calls upstream.
    pub fn upstream(&self) -> UpstreamClient {
        self.upstream.clone()
    }

    pub fn now_ns(&self) -> i64 {
        self.clock.now_ns()
    }

    /// Live processes keyed by pid.
    pub fn cached_processes(&self) -> BTreeMap<i32, Process> {
        self.registry.lock().snapshot()
    }

    pub fn relay_state(&self) -> RelayState {
        *self.relay.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Query the device's clients and reconcile the registry with them.
    ///
    /// Blocks on the device. Concurrent callers are serialized, query and
    /// apply together. Query failures are returned as is and leave the
    /// registry untouched.
    pub fn refresh_clients(&self) -> std::result::Result<usize, DeviceQueryError> {
        let _serial = self.refresh.lock();
        if self.is_disconnected() {
            return Ok(0);
        }
        let clients = self.device.clients()?;
        Ok(self.apply_clients(&clients))
    }

    /// Reconcile the registry with `clients` and publish the resulting
    /// events. Returns how many events were emitted.
    pub fn apply_clients(&self, clients: &[crate::device::ClientInfo]) -> usize {
        let mut registry = self.registry.lock();
        // Checked under the lock so nothing is tracked after shutdown ran.
        if self.is_disconnected() {
            return 0;
        }
        let events = registry.refresh(clients, self.clock.now_ns());
        self.hub.publish_all(&events);
        registry.reap();
        events.len()
    }

    /// React to a device state transition.
    ///
    /// A detached device disconnects the proxy, completing every subscriber.
    /// Any other non-online state ends every tracked process while
    /// subscribers stay attached.
    pub fn device_state_changed(&self, state: DeviceState) {
        let _entered = self.span.enter();
        match state {
            DeviceState::Online => {
                info!(%state, "device back online");
                return;
            }
            DeviceState::Disconnected => {
                info!(%state, "device detached");
                self.disconnect();
                return;
            }
            _ => {}
        }
        let mut registry = self.registry.lock();
        let events = registry.shutdown(self.clock.now_ns());
        self.hub.publish_all(&events);
        registry.reap();
        info!(%state, ended = events.len(), "device left online state");
    }

    /// Attach a subscriber to the merged event stream.
    ///
    /// The subscriber first receives "started" events for the processes
    /// tracked at attach time. Starts the upstream relay if it is idle or
    /// failed.
    pub fn subscribe(&self, filter: EventFilter) -> std::result::Result<Subscription, Status> {
        if self.is_disconnected() {
            return Err(Status::unavailable("transport proxy is disconnected"));
        }
        let subscription = {
            let registry = self.registry.lock();
            self.hub.attach(filter, registry.started_events())
        }
        .ok_or_else(|| Status::unavailable("transport proxy is disconnected"))?;

        self.ensure_relay();
        Ok(subscription)
    }

    /// End every tracked process, stop the relay and complete all
    /// subscribers. Later calls do nothing.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let _entered = self.span.enter();

        let ended = {
            let mut registry = self.registry.lock();
            let events = registry.shutdown(self.clock.now_ns());
            self.hub.publish_all(&events);
            registry.reap();
            events.len()
        };
        self.shutdown.cancel();
        self.hub.close();

        info!(ended, "transport proxy disconnected");
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn ensure_relay(&self) {
        let mut relay = self.relay.lock();
        if matches!(*relay, RelayState::Running | RelayState::Completed)
            || self.shutdown.is_cancelled()
        {
            return;
        }
        let previous = *relay;
        debug!(parent: &self.span, %previous, "starting upstream relay");
        *relay = RelayState::Running;

        let task = relay_upstream(
            self.upstream.clone(),
            self.hub.clone(),
            self.relay.clone(),
            self.shutdown.clone(),
        );
        self.runtime.spawn(task.instrument(self.span.clone()));
    }
}

impl Drop for TransportProxy {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn relay_upstream(
    mut upstream: UpstreamClient,
    hub: Arc<EventMultiplexer>,
    relay: Arc<Mutex<RelayState>>,
    shutdown: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            debug!("upstream relay cancelled");
            return;
        }
        outcome = forward_events(&mut upstream, &hub) => outcome,
    };

    let mut relay = relay.lock();
    match outcome {
        Ok(relayed) => {
            info!(relayed, "upstream event stream completed");
            *relay = RelayState::Completed;
        }
        Err(status) => {
            warn!(code = ?status.code(), message = %status.message(), "upstream event stream failed");
            let failed = hub.fail(status);
            debug!(subscribers = failed, "subscribers terminated by upstream error");
            *relay = RelayState::Failed;
        }
    }
}

async fn forward_events(
    upstream: &mut UpstreamClient,
    hub: &EventMultiplexer,
) -> std::result::Result<u64, Status> {
    let mut stream = upstream
        .get_events(GetEventsRequest::default())
        .await?
        .into_inner();
    let mut relayed = 0;
    while let Some(event) = stream.message().await? {
        hub.publish(&event);
        relayed += 1;
    }
    Ok(relayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClientInfo, FakeDevice};
    use crate::proto::event;
    use crate::testing::{FAKE_TIME_NS, FakeTransportService, TestServer, spawn_fake_upstream};
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use tonic::Code;

    fn client(pid: i32, description: Option<&str>) -> ClientInfo {
        ClientInfo::new(pid, Some("test.package"), description)
    }

    struct Harness {
        proxy: Arc<TransportProxy>,
        device: Arc<FakeDevice>,
        upstream: FakeTransportService,
        _server: TestServer,
    }

    async fn harness(clients: Vec<ClientInfo>) -> Harness {
        let upstream = FakeTransportService::new();
        let (server, client) = spawn_fake_upstream(upstream.clone()).await.unwrap();
        let device = Arc::new(FakeDevice::new("Serial", 26).with_clients(clients));
        let proxy = TransportProxy::connect(device.clone(), client).await.unwrap();
        Harness {
            proxy,
            device,
            upstream,
            _server: server,
        }
    }

    async fn next_event(sub: &mut Subscription) -> proto::Event {
        tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("stream failed")
    }

    async fn rest(sub: &mut Subscription) -> Vec<proto::Event> {
        let mut out = Vec::new();
        while let Some(item) = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("timed out waiting for completion")
        {
            out.push(item.unwrap());
        }
        out
    }

    fn upstream_event(pid: i32) -> proto::Event {
        proto::Event {
            pid,
            is_ended: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_clients_without_description_are_not_cached() {
        let h = harness(vec![
            client(1, Some("testClientDescription")),
            client(2, None),
        ])
        .await;

        let cached = h.proxy.cached_processes();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[&1].state(), proto::process::State::Alive);
        assert_eq!(cached[&1].abi_cpu_arch, "arm");
        assert_eq!(h.proxy.device().model, "Unknown");
    }

    #[tokio::test]
    async fn test_event_streaming_orders_registry_and_upstream_events() {
        let h = harness(vec![client(1, Some("testClient1")), client(2, Some("testClient2"))]).await;
        let event1 = upstream_event(1);
        let event2 = upstream_event(2);
        h.upstream.add_events([event1.clone(), event2.clone()]);

        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(next_event(&mut sub).await);
        }
        h.proxy.disconnect();
        received.extend(rest(&mut sub).await);

        assert_eq!(received.len(), 6);
        for pid in [1, 2] {
            let started = received
                .iter()
                .filter(|e| e.started_process().is_some_and(|p| p.pid == pid))
                .count();
            assert_eq!(started, 1);
            let ended = received
                .iter()
                .filter(|e| e.kind() == event::Kind::Process && e.group_id == i64::from(pid) && e.is_ended)
                .count();
            assert_eq!(ended, 1);
        }
        assert_eq!(received[2], event1);
        assert_eq!(received[3], event2);
    }

    #[tokio::test]
    async fn test_disconnect_twice_emits_no_duplicates() {
        let h = harness(vec![client(1, Some("a")), client(2, Some("b"))]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();

        h.proxy.disconnect();
        h.proxy.disconnect();
        assert!(h.proxy.is_disconnected());

        let events = rest(&mut sub).await;
        let ended: Vec<i32> = events.iter().filter(|e| e.is_ended).map(|e| e.pid).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(ended, vec![1, 2]);
        assert!(h.proxy.cached_processes().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_disconnect_is_idempotent() {
        let h = harness(vec![client(1, Some("a"))]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let proxy = h.proxy.clone();
                tokio::spawn(async move { proxy.disconnect() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let events = rest(&mut sub).await;
        assert_eq!(events.iter().filter(|e| e.is_ended).count(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_sources_keep_generation_order() {
        let h = harness(vec![client(1, Some("a"))]).await;
        let mut first = h.proxy.subscribe(EventFilter::all()).unwrap();
        let mut second = h.proxy.subscribe(EventFilter::all()).unwrap();
        h.upstream.wait_for_streams(1).await;

        let primer = next_event(&mut first).await;
        let mut expected = vec![(primer.pid, primer.is_ended)];
        assert_eq!(expected, vec![(1, false)]);
        let steps: Vec<Box<dyn Fn(&Harness) -> (i32, bool)>> = vec![
            Box::new(|h: &Harness| {
                h.upstream.add_events([upstream_event(10)]);
                (10, true)
            }),
            Box::new(|h: &Harness| {
                h.device.set_clients(vec![client(1, Some("a")), client(3, Some("c"))]);
                h.proxy.refresh_clients().unwrap();
                (3, false)
            }),
            Box::new(|h: &Harness| {
                h.upstream.add_events([upstream_event(11)]);
                (11, true)
            }),
            Box::new(|h: &Harness| {
                h.device.set_clients(vec![client(3, Some("c"))]);
                h.proxy.refresh_clients().unwrap();
                (1, true)
            }),
        ];
        for step in steps {
            expected.push(step(&h));
            let event = next_event(&mut first).await;
            assert_eq!((event.pid, event.is_ended), *expected.last().unwrap());
        }

        let mirrored: Vec<(i32, bool)> = {
            let mut out = Vec::new();
            for _ in 0..expected.len() {
                let event = next_event(&mut second).await;
                out.push((event.pid, event.is_ended));
            }
            out
        };
        assert_eq!(mirrored, expected);
    }

    #[tokio::test]
    async fn test_upstream_error_terminates_every_subscriber() {
        let h = harness(vec![client(1, Some("a"))]).await;
        let mut first = h.proxy.subscribe(EventFilter::all()).unwrap();
        let mut second = h.proxy.subscribe(EventFilter::all()).unwrap();
        h.upstream.wait_for_streams(1).await;
        let before = h.proxy.cached_processes();

        h.upstream.fail_events(Status::internal("upstream gone"));

        for sub in [&mut first, &mut second] {
            assert!(next_event(sub).await.started_process().is_some());
            let status = sub.next().await.unwrap().unwrap_err();
            assert_eq!(status.code(), Code::Internal);
            assert_eq!(status.message(), "upstream gone");
            assert!(sub.next().await.is_none());
        }
        assert_eq!(h.proxy.cached_processes(), before);

        while h.proxy.relay_state() != RelayState::Failed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _third = h.proxy.subscribe(EventFilter::all()).unwrap();
        h.upstream.wait_for_streams(1).await;
        assert_eq!(h.upstream.event_requests(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_after_disconnect_is_unavailable() {
        let h = harness(vec![]).await;
        h.proxy.disconnect();
        let err = h.proxy.subscribe(EventFilter::all()).unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_device_offline_ends_processes_but_keeps_subscribers() {
        let h = harness(vec![client(1, Some("a")), client(2, Some("b"))]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        h.device.set_state(DeviceState::Offline);
        h.proxy.device_state_changed(DeviceState::Offline);

        let ended: Vec<i32> = vec![next_event(&mut sub).await.pid, next_event(&mut sub).await.pid];
        assert_eq!(ended, vec![1, 2]);
        assert!(h.proxy.cached_processes().is_empty());
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
        assert_eq!(h.proxy.subscriber_count(), 1);

        assert!(matches!(h.proxy.refresh_clients(), Err(DeviceQueryError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_device_detach_completes_subscribers() {
        let h = harness(vec![client(1, Some("a"))]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();
        next_event(&mut sub).await;

        h.device.set_state(DeviceState::Disconnected);
        h.proxy.device_state_changed(DeviceState::Disconnected);

        let tail = rest(&mut sub).await;
        assert_eq!(tail.len(), 1);
        assert_eq!((tail[0].pid, tail[0].is_ended), (1, true));
        assert!(h.proxy.is_disconnected());
        assert_eq!(h.proxy.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_refreshes_never_apply_a_stale_list() {
        let h = harness(vec![]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();

        // The slow query captures the empty list, then the process appears.
        h.device.set_client_delay(Duration::from_millis(200));
        let proxy = h.proxy.clone();
        let slow = tokio::task::spawn_blocking(move || proxy.refresh_clients());
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.device.set_client_delay(Duration::ZERO);
        h.device.set_clients(vec![client(1, Some("a"))]);
        let proxy = h.proxy.clone();
        let fresh = tokio::task::spawn_blocking(move || proxy.refresh_clients());

        assert_eq!(slow.await.unwrap().unwrap(), 0);
        assert_eq!(fresh.await.unwrap().unwrap(), 1);
        let started = next_event(&mut sub).await;
        assert_eq!(started.started_process().map(|p| p.pid), Some(1));
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
        assert!(h.proxy.cached_processes().contains_key(&1));
    }

    #[tokio::test]
    async fn test_upstream_completion_keeps_subscribers_open() {
        let h = harness(vec![]).await;
        let mut sub = h.proxy.subscribe(EventFilter::all()).unwrap();
        h.upstream.wait_for_streams(1).await;

        h.upstream.finish_events();
        while h.proxy.relay_state() != RelayState::Completed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        h.device.set_clients(vec![client(4, Some("d"))]);
        h.proxy.refresh_clients().unwrap();
        assert_eq!(next_event(&mut sub).await.pid, 4);

        h.proxy.disconnect();
        let tail = rest(&mut sub).await;
        assert_eq!(tail.len(), 1);
        assert!(tail[0].is_ended);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let h = harness(vec![client(1, Some("a")), client(2, Some("b"))]).await;
        let filter = EventFilter {
            pid: Some(2),
            ..EventFilter::all()
        };
        let mut sub = h.proxy.subscribe(filter).unwrap();
        h.proxy.disconnect();

        let events = rest(&mut sub).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.pid == 2));
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches() {
        let h = harness(vec![]).await;
        let sub = h.proxy.subscribe(EventFilter::all()).unwrap();
        assert_eq!(h.proxy.subscriber_count(), 1);
        drop(sub);
        assert_eq!(h.proxy.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_proxy_completes_subscribers() {
        let Harness { proxy, upstream: _upstream, _server, .. } = harness(vec![client(1, Some("a"))]).await;
        let mut sub = proxy.subscribe(EventFilter::all()).unwrap();
        drop(proxy);

        let events = rest(&mut sub).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_ended);
    }

    #[tokio::test]
    async fn test_timestamps_follow_upstream_clock() {
        let h = harness(vec![client(1, Some("a"))]).await;
        let started = h.proxy.cached_processes()[&1].start_timestamp_ns;
        assert!(started >= FAKE_TIME_NS);
        assert!(h.proxy.now_ns() >= started);

        let device_time = 7_200_000_000_000;
        let upstream = FakeTransportService::new().with_time(device_time);
        let (_server, client) = spawn_fake_upstream(upstream).await.unwrap();
        let device = Arc::new(FakeDevice::new("Other", 26));
        let proxy = TransportProxy::connect(device, client).await.unwrap();
        let now = proxy.now_ns();
        assert!(now >= device_time);
        assert!(now < device_time + 60_000_000_000);
    }
}
