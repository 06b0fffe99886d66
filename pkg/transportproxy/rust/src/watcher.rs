// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Device client-change notifier
//!
//! Polls the device on the blocking pool and feeds state transitions and
//! client lists into a [`TransportProxy`].

use crate::device::DeviceState;
use crate::error::DeviceQueryError;
use crate::proxy::TransportProxy;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct ClientWatcher;

impl ClientWatcher {
    /// Poll every `interval` until `shutdown` fires, the device detaches or
    /// the proxy is gone. Intervals below [`MIN_POLL_INTERVAL`] are raised
    /// to it.
    pub fn spawn(
        proxy: &Arc<TransportProxy>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let proxy = Arc::downgrade(proxy);
        tokio::spawn(watch(proxy, interval.max(MIN_POLL_INTERVAL), shutdown))
    }
}

async fn watch(proxy: Weak<TransportProxy>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_state: Option<DeviceState> = None;

    info!(interval_ms = interval.as_millis() as u64, "client watcher started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(target) = proxy.upgrade().filter(|p| !p.is_disconnected()) else {
            break;
        };

        let probe = target.clone();
        let polled = tokio::task::spawn_blocking(move || {
            let state = probe.device_handle().state()?;
            let refreshed = state.is_online().then(|| probe.refresh_clients());
            Ok::<_, DeviceQueryError>((state, refreshed))
        })
        .await;

        let (state, refreshed) = match polled {
            Ok(Ok(polled)) => polled,
            Ok(Err(e)) => {
                // Unknown state is not a transition; retry on the next tick.
                warn!(error = %e, "device state query failed");
                continue;
            }
            Err(e) => {
                error!(error = %e, "device poll task failed");
                break;
            }
        };

        if last_state != Some(state) {
            // The proxy starts from an online snapshot, so only an offline
            // first observation is a transition.
            if last_state.is_some() || !state.is_online() {
                target.device_state_changed(state);
            }
            last_state = Some(state);
        }
        if target.is_disconnected() {
            break;
        }

        match refreshed {
            Some(Ok(0)) | None => {}
            Some(Ok(events)) => debug!(events, "client list changed"),
            Some(Err(e)) => warn!(error = %e, "client query failed"),
        }
    }
    info!("client watcher stopped");
}
