// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory [`DeviceHandle`] used by tests and local experiments.

use super::{AndroidVersion, ClientInfo, DeviceHandle, DeviceState};
use crate::error::DeviceQueryError;
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;

pub const DEFAULT_BOOT_ID_OUTPUT: &str = "boot-id\n";

/// A device whose attributes are fixed at construction and whose client
/// list, state and shell behavior can be changed at any time.
pub struct FakeDevice {
    serial: String,
    name: String,
    version: AndroidVersion,
    abis: Vec<String>,
    model: Option<String>,
    manufacturer: Option<String>,
    emulator: bool,
    avd_name: Option<String>,
    state: Mutex<Result<DeviceState, DeviceQueryError>>,
    clients: Mutex<Vec<ClientInfo>>,
    client_delay: Mutex<Duration>,
    shell: Mutex<Result<String, DeviceQueryError>>,
    shell_commands: Mutex<Vec<String>>,
}

impl FakeDevice {
    /// An online physical device with a single `armeabi` ABI, no model
    /// property and a shell that answers every command with a boot id.
    pub fn new(serial: &str, api_level: i32) -> Self {
        Self {
            serial: serial.to_string(),
            name: "Device".to_string(),
            version: AndroidVersion::new(api_level),
            abis: vec!["armeabi".to_string()],
            model: None,
            manufacturer: None,
            emulator: false,
            avd_name: None,
            state: Mutex::new(Ok(DeviceState::Online)),
            clients: Mutex::new(Vec::new()),
            client_delay: Mutex::new(Duration::ZERO),
            shell: Mutex::new(Ok(DEFAULT_BOOT_ID_OUTPUT.to_string())),
            shell_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clients(self, clients: Vec<ClientInfo>) -> Self {
        *self.clients.lock() = clients;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_version(mut self, version: AndroidVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_abis(mut self, abis: &[&str]) -> Self {
        self.abis = abis.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Mark the device as an emulator with an optional AVD name.
    pub fn with_emulator(mut self, avd_name: Option<&str>) -> Self {
        self.emulator = true;
        self.avd_name = avd_name.map(str::to_string);
        self
    }

    pub fn with_shell_output(self, output: &str) -> Self {
        *self.shell.lock() = Ok(output.to_string());
        self
    }

    pub fn set_clients(&self, clients: Vec<ClientInfo>) {
        *self.clients.lock() = clients;
    }

    pub fn set_state(&self, state: DeviceState) {
        *self.state.lock() = Ok(state);
    }

    /// Make every following state query fail with `err`.
    pub fn fail_state_with(&self, err: DeviceQueryError) {
        *self.state.lock() = Err(err);
    }

    /// Delay client queries by `delay`. The list is read before the delay,
    /// so a slow query returns what was current when it started.
    pub fn set_client_delay(&self, delay: Duration) {
        *self.client_delay.lock() = delay;
    }

    /// Make every following shell command fail with `err`.
    pub fn fail_shell_with(&self, err: DeviceQueryError) {
        *self.shell.lock() = Err(err);
    }

    /// Commands executed so far, oldest first.
    pub fn shell_commands(&self) -> Vec<String> {
        self.shell_commands.lock().clone()
    }
}

impl DeviceHandle for FakeDevice {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> Result<DeviceState, DeviceQueryError> {
        self.state.lock().clone()
    }

    fn version(&self) -> AndroidVersion {
        self.version.clone()
    }

    fn abis(&self) -> Vec<String> {
        self.abis.clone()
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }

    fn manufacturer(&self) -> Option<String> {
        self.manufacturer.clone()
    }

    fn is_emulator(&self) -> bool {
        self.emulator
    }

    fn avd_name(&self) -> Option<String> {
        self.avd_name.clone()
    }

    fn clients(&self) -> Result<Vec<ClientInfo>, DeviceQueryError> {
        let state = self.state()?;
        if !state.is_online() {
            return Err(DeviceQueryError::Rejected(format!(
                "device '{}' is {state}",
                self.serial
            )));
        }
        let clients = self.clients.lock().clone();
        let delay = *self.client_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(clients)
    }

    fn execute_shell_command(&self, command: &str) -> Result<String, DeviceQueryError> {
        self.shell_commands.lock().push(command.to_string());
        self.shell.lock().clone()
    }
}
