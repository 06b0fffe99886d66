// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::Channel;
use transport_proxy::device::{ClientInfo, FakeDevice};
use transport_proxy::error::ProxyError;
use transport_proxy::proto::Event;
use transport_proxy::proto::transport_service_client::TransportServiceClient;
use transport_proxy::testing::{FakeTransportService, TestServer, spawn_fake_upstream};
use transport_proxy::{TransportProxy, TransportProxyService, transport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fake upstream, fake device and a proxy served on an ephemeral port.
pub struct ProxyStack {
    pub upstream: FakeTransportService,
    pub device: Arc<FakeDevice>,
    pub proxy: Arc<TransportProxy>,
    pub client: TransportServiceClient<Channel>,
    upstream_server: TestServer,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), ProxyError>>,
}

impl ProxyStack {
    pub async fn start(clients: Vec<ClientInfo>) -> Self {
        Self::start_with(FakeTransportService::new(), clients).await
    }

    pub async fn start_with(upstream: FakeTransportService, clients: Vec<ClientInfo>) -> Self {
        let (upstream_server, upstream_client) = spawn_fake_upstream(upstream.clone())
            .await
            .expect("failed to start fake upstream");
        let device = Arc::new(FakeDevice::new("Serial", 26).with_clients(clients));
        let proxy = TransportProxy::connect(device.clone(), upstream_client)
            .await
            .expect("failed to connect proxy");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server = tokio::spawn(transport::serve_on_listener(
            listener,
            TransportProxyService::new(proxy.clone()).into_server(),
            async move { token.cancelled().await },
        ));

        let client = transport::connect_upstream(&format!("http://{addr}"))
            .await
            .expect("failed to connect to proxy");

        Self {
            upstream,
            device,
            proxy,
            client,
            upstream_server,
            shutdown,
            server,
        }
    }

    pub async fn stop(self) {
        self.proxy.disconnect();
        drop(self.client);
        self.shutdown.cancel();
        let served = tokio::time::timeout(DEFAULT_TIMEOUT, self.server)
            .await
            .expect("proxy server did not stop");
        served.unwrap().unwrap();
        self.upstream_server.stop().await;
    }
}

pub fn client(pid: i32, description: Option<&str>) -> ClientInfo {
    ClientInfo::new(pid, Some("com.example"), description)
}

/// Next event of a gRPC event stream, failing the test on timeout, error or
/// end of stream.
pub async fn next_event(stream: &mut Streaming<Event>) -> Event {
    tokio::time::timeout(DEFAULT_TIMEOUT, stream.message())
        .await
        .expect("timed out waiting for event")
        .expect("event stream failed")
        .expect("event stream ended")
}

/// Remaining events until the stream completes.
pub async fn drain(stream: &mut Streaming<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(DEFAULT_TIMEOUT, stream.message())
        .await
        .expect("timed out waiting for completion")
        .expect("event stream failed")
    {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or `DEFAULT_TIMEOUT` elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
