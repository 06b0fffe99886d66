// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! gRPC TransportService implementation
//! Serves the proxy with the same surface as the upstream it relays

use crate::multiplexer::{EventFilter, Subscription};
use crate::proto::transport_service_server::{TransportService, TransportServiceServer};
use crate::proto::{
    BytesRequest, BytesResponse, ExecuteRequest, ExecuteResponse, GetDevicesRequest,
    GetDevicesResponse, GetEventsRequest, GetProcessesRequest, GetProcessesResponse, TimeRequest,
    TimeResponse, VersionRequest, VersionResponse,
};
use crate::proxy::TransportProxy;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

/// Answers device and process queries locally, forwards the remaining unary
/// calls upstream and serves the merged event stream.
pub struct TransportProxyService {
    proxy: Arc<TransportProxy>,
}

impl TransportProxyService {
    pub fn new(proxy: Arc<TransportProxy>) -> Self {
        Self { proxy }
    }

    pub fn into_server(self) -> TransportServiceServer<Self> {
        TransportServiceServer::new(self)
    }
}

fn forward_failed(method: &'static str) -> impl FnOnce(Status) -> Status {
    move |status| {
        error!(method, code = ?status.code(), message = %status.message(), "upstream call failed");
        status
    }
}

#[tonic::async_trait]
impl TransportService for TransportProxyService {
    type GetEventsStream = Subscription;

    async fn get_current_time(
        &self,
        request: Request<TimeRequest>,
    ) -> Result<Response<TimeResponse>, Status> {
        let response = self
            .proxy
            .upstream()
            .get_current_time(request.into_inner())
            .await
            .map_err(forward_failed("GetCurrentTime"))?;
        Ok(Response::new(response.into_inner()))
    }

    async fn get_version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        let response = self
            .proxy
            .upstream()
            .get_version(request.into_inner())
            .await
            .map_err(forward_failed("GetVersion"))?;
        Ok(Response::new(response.into_inner()))
    }

    async fn get_bytes(
        &self,
        request: Request<BytesRequest>,
    ) -> Result<Response<BytesResponse>, Status> {
        let req = request.into_inner();
        debug!(id = %req.id, "gRPC GetBytes request received");
        let response = self
            .proxy
            .upstream()
            .get_bytes(req)
            .await
            .map_err(forward_failed("GetBytes"))?;
        Ok(Response::new(response.into_inner()))
    }

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        if let Some(command) = &req.command {
            info!(
                command_type = ?command.command_type(),
                pid = command.pid,
                "gRPC Execute request received"
            );
        }
        let response = self
            .proxy
            .upstream()
            .execute(req)
            .await
            .map_err(forward_failed("Execute"))?;
        Ok(Response::new(response.into_inner()))
    }

    async fn get_devices(
        &self,
        _request: Request<GetDevicesRequest>,
    ) -> Result<Response<GetDevicesResponse>, Status> {
        Ok(Response::new(GetDevicesResponse {
            devices: vec![self.proxy.device().clone()],
        }))
    }

    async fn get_processes(
        &self,
        request: Request<GetProcessesRequest>,
    ) -> Result<Response<GetProcessesResponse>, Status> {
        let req = request.into_inner();
        let processes = if req.device_id == self.proxy.device().device_id {
            self.proxy.cached_processes().into_values().collect()
        } else {
            debug!(device_id = req.device_id, "GetProcesses for an unknown device");
            Vec::new()
        };
        Ok(Response::new(GetProcessesResponse { processes }))
    }

    async fn get_events(
        &self,
        request: Request<GetEventsRequest>,
    ) -> Result<Response<Self::GetEventsStream>, Status> {
        let req = request.into_inner();
        let filter = EventFilter::from(&req);
        let subscription = self.proxy.subscribe(filter)?;
        info!(
            subscriber_id = subscription.id(),
            kind = ?req.kind(),
            pid = req.pid,
            "gRPC GetEvents subscription opened"
        );
        Ok(Response::new(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClientInfo, FakeDevice};
    use crate::proto::{Command, command};
    use crate::testing::{FAKE_TIME_NS, FAKE_VERSION, FakeTransportService, spawn_fake_upstream};
    use tokio_stream::StreamExt;

    async fn service(upstream: FakeTransportService) -> (TransportProxyService, crate::testing::TestServer) {
        let (server, client) = spawn_fake_upstream(upstream).await.unwrap();
        let device = Arc::new(FakeDevice::new("Serial", 26).with_clients(vec![ClientInfo::new(
            7,
            Some("com.example"),
            Some("com.example"),
        )]));
        let proxy = TransportProxy::connect(device, client).await.unwrap();
        (TransportProxyService::new(proxy), server)
    }

    #[tokio::test]
    async fn test_unary_calls_are_forwarded() {
        let upstream = FakeTransportService::new();
        let (svc, _server) = service(upstream.clone()).await;

        let time = svc.get_current_time(Request::new(TimeRequest::default())).await.unwrap();
        assert_eq!(time.into_inner().timestamp_ns, FAKE_TIME_NS);

        let version = svc.get_version(Request::new(VersionRequest::default())).await.unwrap();
        assert_eq!(version.into_inner().version, FAKE_VERSION);

        let bytes = svc
            .get_bytes(Request::new(BytesRequest {
                stream_id: 0,
                id: "abc".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(bytes.into_inner().contents, b"abc");

        let command = Command {
            command_type: command::CommandType::Echo as i32,
            pid: 7,
            ..Default::default()
        };
        svc.execute(Request::new(ExecuteRequest {
            command: Some(command.clone()),
        }))
        .await
        .unwrap();
        assert_eq!(upstream.executed(), vec![command]);
    }

    #[tokio::test]
    async fn test_upstream_status_is_returned() {
        let (svc, _server) = service(FakeTransportService::new()).await;
        let err = svc
            .execute(Request::new(ExecuteRequest { command: None }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_devices_and_processes_are_local() {
        let (svc, _server) = service(FakeTransportService::new()).await;

        let devices = svc
            .get_devices(Request::new(GetDevicesRequest {}))
            .await
            .unwrap()
            .into_inner()
            .devices;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "Serial");

        let device_id = devices[0].device_id;
        let processes = svc
            .get_processes(Request::new(GetProcessesRequest { device_id }))
            .await
            .unwrap()
            .into_inner()
            .processes;
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].pid, 7);

        let other = svc
            .get_processes(Request::new(GetProcessesRequest {
                device_id: device_id.wrapping_add(1),
            }))
            .await
            .unwrap()
            .into_inner()
            .processes;
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_get_events_streams_primed_processes() {
        let (svc, _server) = service(FakeTransportService::new()).await;
        let mut stream = svc
            .get_events(Request::new(GetEventsRequest::default()))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.started_process().map(|p| p.pid), Some(7));

        svc.proxy.disconnect();
        let ended = stream.next().await.unwrap().unwrap();
        assert!(ended.is_ended);
        assert!(stream.next().await.is_none());

        let err = svc
            .get_events(Request::new(GetEventsRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }
}
