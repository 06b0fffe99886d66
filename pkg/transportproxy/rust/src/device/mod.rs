// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Device capability port
//!
//! The proxy only ever talks to a device through [`DeviceHandle`]. Adapters:
//! - [`AdbDevice`]: a real device reached through the ADB server
//! - [`FakeDevice`]: an in-memory double for tests

pub mod adb;
pub mod fake;

pub use adb::{AdbDevice, AdbServer};
pub use fake::FakeDevice;

use crate::error::DeviceQueryError;
use crate::proto;
use std::fmt;

/// Connection state of a device as reported by the ADB server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Online,
    Offline,
    Unauthorized,
    Bootloader,
    Recovery,
    Disconnected,
}

impl DeviceState {
    pub fn is_online(self) -> bool {
        self == DeviceState::Online
    }

    /// Parse the state column of `host:devices`.
    pub fn from_adb(s: &str) -> Self {
        match s {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "bootloader" => DeviceState::Bootloader,
            "recovery" | "sideload" | "rescue" => DeviceState::Recovery,
            _ => DeviceState::Disconnected,
        }
    }
}

impl From<DeviceState> for proto::device::State {
    fn from(state: DeviceState) -> Self {
        match state {
            DeviceState::Online => proto::device::State::Online,
            DeviceState::Disconnected => proto::device::State::Disconnected,
            _ => proto::device::State::Offline,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Online => write!(f, "online"),
            DeviceState::Offline => write!(f, "offline"),
            DeviceState::Unauthorized => write!(f, "unauthorized"),
            DeviceState::Bootloader => write!(f, "bootloader"),
            DeviceState::Recovery => write!(f, "recovery"),
            DeviceState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Platform version of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidVersion {
    pub api_level: i32,
    /// Set only for preview builds.
    pub codename: Option<String>,
    /// User-visible release string, e.g. "8.0.0".
    pub release: Option<String>,
}

impl AndroidVersion {
    pub fn new(api_level: i32) -> Self {
        Self {
            api_level,
            ..Default::default()
        }
    }

    pub fn is_preview(&self) -> bool {
        self.codename.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Preview builds expose the features of the next API level.
    pub fn feature_level(&self) -> i32 {
        if self.is_preview() {
            self.api_level + 1
        } else {
            self.api_level
        }
    }
}

/// A debuggable process (client) observed on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub pid: i32,
    pub package_name: Option<String>,
    /// Absent until the client finished its handshake.
    pub description: Option<String>,
    pub abi: Option<String>,
}

impl ClientInfo {
    pub fn new(pid: i32, package_name: Option<&str>, description: Option<&str>) -> Self {
        Self {
            pid,
            package_name: package_name.map(str::to_string),
            description: description.map(str::to_string),
            abi: None,
        }
    }

    pub fn with_abi(mut self, abi: &str) -> Self {
        self.abi = Some(abi.to_string());
        self
    }

    /// Clients lacking a package name or a description cannot be observed.
    pub fn is_qualifying(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.package_name) && present(&self.description)
    }
}

/// Read-only capability interface over a live device.
///
/// Attributes are read once at connect time. [`DeviceHandle::state`],
/// [`DeviceHandle::clients`] and [`DeviceHandle::execute_shell_command`] go
/// to the device and may block.
pub trait DeviceHandle: Send + Sync {
    fn serial(&self) -> String;

    fn name(&self) -> String;

    /// Current connection state. A device no longer attached reports
    /// [`DeviceState::Disconnected`]; an error means the state is unknown.
    fn state(&self) -> Result<DeviceState, DeviceQueryError>;

    fn is_online(&self) -> Result<bool, DeviceQueryError> {
        Ok(self.state()?.is_online())
    }

    fn version(&self) -> AndroidVersion;

    fn abis(&self) -> Vec<String>;

    fn model(&self) -> Option<String>;

    fn manufacturer(&self) -> Option<String>;

    fn is_emulator(&self) -> bool;

    fn avd_name(&self) -> Option<String>;

    /// Current client list. May block on the device channel.
    fn clients(&self) -> Result<Vec<ClientInfo>, DeviceQueryError>;

    /// Run a shell command and return its raw output. Blocks until the
    /// command finishes or the channel gives up.
    fn execute_shell_command(&self, command: &str) -> Result<String, DeviceQueryError>;
}

/// Map an Android ABI name to its CPU architecture.
pub fn cpu_arch_for_abi(abi: &str) -> &'static str {
    match abi {
        "armeabi" | "armeabi-v7a" => "arm",
        "arm64-v8a" => "arm64",
        "x86" => "x86",
        "x86_64" => "x86_64",
        "mips" => "mips",
        "mips64" => "mips64",
        _ => "unknown",
    }
}
