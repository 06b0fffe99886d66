// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{ProxyError, Result};
use crate::proto::transport_service_client::TransportServiceClient;
use crate::proto::transport_service_server::TransportServiceServer;
use crate::proxy::UpstreamClient;
use crate::service::TransportProxyService;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Endpoint, Server};
use tracing::info;

#[cfg(unix)]
use hyper_util::rt::TokioIo;
#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tokio_stream::wrappers::UnixListenerStream;
#[cfg(unix)]
use tonic::transport::Uri;
#[cfg(unix)]
use tower::service_fn;

const UNIX_SCHEME: &str = "unix://";

pub type ProxyServer = TransportServiceServer<TransportProxyService>;

/// Where the proxy accepts subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenAddr::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
        }
    }
}

pub async fn serve<F>(listen: &ListenAddr, server: ProxyServer, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match listen {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            serve_on_listener(listener, server, shutdown).await
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => serve_on_unix_socket(path, server, shutdown).await,
        #[cfg(not(unix))]
        ListenAddr::Unix(path) => Err(ProxyError::InvalidEndpoint(format!(
            "{UNIX_SCHEME}{}",
            path.display()
        ))),
    }
}

/// Serve on an already bound listener (tests bind port 0).
pub async fn serve_on_listener<F>(
    listener: TcpListener,
    server: ProxyServer,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "transport proxy listening");
    Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;
    Ok(())
}

#[cfg(unix)]
async fn serve_on_unix_socket<F>(path: &Path, server: ProxyServer, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
    }

    info!(socket = %path.display(), "transport proxy listening");
    let served = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await;

    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    served?;
    Ok(())
}

/// Connect to an upstream transport service at `http://host:port` or
/// `unix:///path/to/socket`.
pub async fn connect_upstream(endpoint: &str) -> Result<UpstreamClient> {
    if let Some(path) = endpoint.strip_prefix(UNIX_SCHEME) {
        return connect_unix(path, endpoint).await;
    }
    let channel = Endpoint::from_shared(endpoint.to_string())
        .map_err(|_| ProxyError::InvalidEndpoint(endpoint.to_string()))?
        .connect()
        .await?;
    Ok(TransportServiceClient::new(channel))
}

#[cfg(unix)]
async fn connect_unix(path: &str, endpoint: &str) -> Result<UpstreamClient> {
    if path.is_empty() {
        return Err(ProxyError::InvalidEndpoint(endpoint.to_string()));
    }
    let path = PathBuf::from(path);
    // The URI is ignored by the connector.
    let channel = Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await?;
    Ok(TransportServiceClient::new(channel))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &str, endpoint: &str) -> Result<UpstreamClient> {
    Err(ProxyError::InvalidEndpoint(endpoint.to_string()))
}
