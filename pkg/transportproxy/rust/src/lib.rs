// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Device transport proxy
//!
//! Bridges an Android device's process lifecycle, observed through ADB, into
//! the `profiler.proto.TransportService` event stream, merged with the events
//! of an upstream transport service and fanned out to any number of
//! subscribers in one order.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod multiplexer;
pub mod proto;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod transport;
pub mod translator;
pub mod watcher;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::ProxyConfig;
pub use error::{ConfigError, DeviceQueryError, ProxyError};
pub use multiplexer::{EventFilter, Subscription};
pub use proxy::TransportProxy;
pub use service::TransportProxyService;
pub use watcher::ClientWatcher;
