// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Transport proxy daemon: bridges one ADB device into a gRPC transport
//! event stream.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use transport_proxy::config::TransportMode;
use transport_proxy::device::{AdbDevice, AdbServer, DeviceHandle};
use transport_proxy::{
    ClientWatcher, ProxyConfig, TransportProxy, TransportProxyService, transport,
};

#[derive(Parser, Debug)]
#[command(name = "transport-proxyd")]
#[command(about = "Relay device process events into a gRPC transport service")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream transport endpoint (http://host:port or unix:///path)
    #[arg(long)]
    upstream: Option<String>,

    /// Serial of the device to bridge
    #[arg(short, long)]
    serial: Option<String>,

    /// Listen on this Unix socket instead of TCP
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Client poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(upstream) = self.upstream {
            config.upstream = upstream;
        }
        if let Some(serial) = self.serial {
            config.device_serial = Some(serial);
        }
        if let Some(socket) = self.socket {
            config.transport_mode = TransportMode::Unix;
            config.socket = socket;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ProxyConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        upstream = %config.upstream,
        listen = %config.listen(),
        adb = %config.adb_addr,
        "Starting transport-proxyd"
    );

    run(config).await
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let adb = AdbServer::new(config.adb_addr, config.adb_timeout());
    let serial = config.device_serial.clone();
    let device = tokio::task::spawn_blocking(move || match serial {
        Some(serial) => AdbDevice::connect(adb, &serial),
        None => AdbDevice::connect_first(adb),
    })
    .await?
    .context("connecting to device")?;
    let device: Arc<dyn DeviceHandle> = Arc::new(device);

    let upstream = transport::connect_upstream(&config.upstream)
        .await
        .with_context(|| format!("connecting to upstream {}", config.upstream))?;
    let proxy = TransportProxy::connect(device, upstream)
        .await
        .context("starting transport proxy")?;

    let shutdown = CancellationToken::new();
    let watcher = ClientWatcher::spawn(&proxy, config.poll_interval(), shutdown.clone());

    let server = TransportProxyService::new(proxy.clone()).into_server();
    let signal = shutdown.clone();
    let stopping = proxy.clone();
    let served = transport::serve(&config.listen(), server, async move {
        shutdown_signal().await;
        signal.cancel();
        // Completes open event streams so the server can drain.
        stopping.disconnect();
    })
    .await;

    shutdown.cancel();
    proxy.disconnect();
    let _ = watcher.await;
    tracing::info!("transport-proxyd stopped");

    served.context("serving transport proxy")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
