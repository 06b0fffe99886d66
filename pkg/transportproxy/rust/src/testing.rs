// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Test helpers: a scriptable upstream transport service and a way to serve
//! it on an ephemeral port.

use crate::error::ProxyError;
use crate::proto::transport_service_client::TransportServiceClient;
use crate::proto::transport_service_server::{TransportService, TransportServiceServer};
use crate::proto::{
    BytesRequest, BytesResponse, Command, Event, ExecuteRequest, ExecuteResponse,
    GetDevicesRequest, GetDevicesResponse, GetEventsRequest, GetProcessesRequest,
    GetProcessesResponse, TimeRequest, TimeResponse, VersionRequest, VersionResponse,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{TcpListenerStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};

pub const FAKE_TIME_NS: i64 = 1_000_000_000;
pub const FAKE_VERSION: &str = "fake-transport";

type EventSender = mpsc::UnboundedSender<Result<Event, Status>>;

#[derive(Default)]
struct FakeState {
    time_ns: i64,
    backlog: Vec<Event>,
    streams: Vec<EventSender>,
    event_requests: usize,
    executed: Vec<Command>,
}

/// Upstream transport service whose event stream is driven by the test.
///
/// Events added while no `GetEvents` stream is open are buffered and
/// handed to the next stream.
#[derive(Clone)]
pub struct FakeTransportService {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeTransportService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransportService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                time_ns: FAKE_TIME_NS,
                ..Default::default()
            })),
        }
    }

    pub fn with_time(self, time_ns: i64) -> Self {
        self.state.lock().time_ns = time_ns;
        self
    }

    pub fn add_events(&self, events: impl IntoIterator<Item = Event>) {
        let mut state = self.state.lock();
        for event in events {
            if state.streams.is_empty() {
                state.backlog.push(event);
            } else {
                state.streams.retain(|tx| tx.send(Ok(event.clone())).is_ok());
            }
        }
    }

    /// Terminate every open event stream with `status`.
    pub fn fail_events(&self, status: Status) -> usize {
        let streams = std::mem::take(&mut self.state.lock().streams);
        let count = streams.len();
        for tx in streams {
            let _ = tx.send(Err(status.clone()));
        }
        count
    }

    /// Complete every open event stream normally.
    pub fn finish_events(&self) -> usize {
        std::mem::take(&mut self.state.lock().streams).len()
    }

    pub fn open_streams(&self) -> usize {
        let mut state = self.state.lock();
        state.streams.retain(|tx| !tx.is_closed());
        state.streams.len()
    }

    /// Number of `GetEvents` calls received so far.
    pub fn event_requests(&self) -> usize {
        self.state.lock().event_requests
    }

    pub fn executed(&self) -> Vec<Command> {
        self.state.lock().executed.clone()
    }

    /// Wait until `n` event streams are open.
    pub async fn wait_for_streams(&self, n: usize) {
        while self.open_streams() < n {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[tonic::async_trait]
impl TransportService for FakeTransportService {
    type GetEventsStream = UnboundedReceiverStream<Result<Event, Status>>;

    async fn get_current_time(
        &self,
        _request: Request<TimeRequest>,
    ) -> Result<Response<TimeResponse>, Status> {
        Ok(Response::new(TimeResponse {
            timestamp_ns: self.state.lock().time_ns,
        }))
    }

    async fn get_version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: FAKE_VERSION.to_string(),
        }))
    }

    async fn get_bytes(
        &self,
        request: Request<BytesRequest>,
    ) -> Result<Response<BytesResponse>, Status> {
        Ok(Response::new(BytesResponse {
            contents: request.into_inner().id.into_bytes(),
        }))
    }

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let command = request
            .into_inner()
            .command
            .ok_or_else(|| Status::invalid_argument("missing command"))?;
        self.state.lock().executed.push(command);
        Ok(Response::new(ExecuteResponse {}))
    }

    async fn get_devices(
        &self,
        _request: Request<GetDevicesRequest>,
    ) -> Result<Response<GetDevicesResponse>, Status> {
        Ok(Response::new(GetDevicesResponse::default()))
    }

    async fn get_processes(
        &self,
        _request: Request<GetProcessesRequest>,
    ) -> Result<Response<GetProcessesResponse>, Status> {
        Ok(Response::new(GetProcessesResponse::default()))
    }

    async fn get_events(
        &self,
        _request: Request<GetEventsRequest>,
    ) -> Result<Response<Self::GetEventsStream>, Status> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.event_requests += 1;
        for event in std::mem::take(&mut state.backlog) {
            let _ = tx.send(Ok(event));
        }
        state.streams.push(tx);
        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }
}

/// A gRPC server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve `service` on 127.0.0.1 with an OS-assigned port.
    pub async fn spawn<S>(service: S) -> Result<Self, ProxyError>
    where
        S: TransportService,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = Server::builder()
                .add_service(TransportServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), token.cancelled())
                .await;
        });
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn client(&self) -> Result<TransportServiceClient<Channel>, ProxyError> {
        let channel = Endpoint::from_shared(self.endpoint())
            .map_err(|_| ProxyError::InvalidEndpoint(self.endpoint()))?
            .connect()
            .await?;
        Ok(TransportServiceClient::new(channel))
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Start a fake upstream and return it with a connected client.
pub async fn spawn_fake_upstream(
    service: FakeTransportService,
) -> Result<(TestServer, TransportServiceClient<Channel>), ProxyError> {
    let server = TestServer::spawn(service).await?;
    let client = server.client().await?;
    Ok((server, client))
}
