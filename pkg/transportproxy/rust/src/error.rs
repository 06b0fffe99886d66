// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Error types
//!
//! Device query failures are surfaced to the caller of the affected query and
//! never retried here. Upstream stream failures travel as `tonic::Status`
//! through the event stream instead.

use std::io;
use thiserror::Error;
use tonic::Status;

/// Failure of a query against the device-communication channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceQueryError {
    #[error("device query timed out: {0}")]
    Timeout(String),

    #[error("device rejected the command: {0}")]
    Rejected(String),

    #[error("shell command unresponsive: {0}")]
    Unresponsive(String),

    #[error("device I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for DeviceQueryError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                DeviceQueryError::Timeout(err.to_string())
            }
            _ => DeviceQueryError::Io(err.to_string()),
        }
    }
}

impl From<DeviceQueryError> for Status {
    fn from(err: DeviceQueryError) -> Self {
        match err {
            DeviceQueryError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
            DeviceQueryError::Rejected(_) => Status::failed_precondition(err.to_string()),
            DeviceQueryError::Unresponsive(_) | DeviceQueryError::Io(_) => {
                Status::unavailable(err.to_string())
            }
        }
    }
}

/// Errors raised while building or serving a proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    DeviceQuery(#[from] DeviceQueryError),

    #[error("upstream transport call failed: {0}")]
    Upstream(#[from] Status),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid upstream endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("blocking device task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
