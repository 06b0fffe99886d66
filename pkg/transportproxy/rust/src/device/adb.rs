// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Real-device adapter speaking the ADB host protocol.
//!
//! Every request is a 4-hex-digit length followed by the ASCII payload; the
//! server answers `OKAY` or `FAIL` plus a length-prefixed message. Each
//! query opens its own connection, bounded by the configured timeout.

use super::{AndroidVersion, ClientInfo, DeviceHandle, DeviceState};
use crate::error::DeviceQueryError;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_ADB_ADDR: &str = "127.0.0.1:5037";

const MAX_REQUEST_LEN: usize = 0xffff;
const PS_COMMAND: &str = "ps -A -o PID,NAME";
const PRE_INITIALIZED: &str = "<pre-initialized>";

const PROP_MODEL: &str = "ro.product.model";
const PROP_MANUFACTURER: &str = "ro.product.manufacturer";
const PROP_SDK: &str = "ro.build.version.sdk";
const PROP_CODENAME: &str = "ro.build.version.codename";
const PROP_RELEASE: &str = "ro.build.version.release";
const PROP_ABI_LIST: &str = "ro.product.cpu.abilist";
const PROP_ABI: &str = "ro.product.cpu.abi";
const PROP_AVD_NAMES: [&str; 2] = ["ro.boot.qemu.avd_name", "ro.kernel.qemu.avd_name"];
const PROP_QEMU: [&str; 2] = ["ro.boot.qemu", "ro.kernel.qemu"];

/// Connection parameters of a local ADB server.
#[derive(Debug, Clone)]
pub struct AdbServer {
    addr: SocketAddr,
    timeout: Duration,
}

impl AdbServer {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// List attached devices (`host:devices`).
    pub fn devices(&self) -> Result<Vec<(String, DeviceState)>, DeviceQueryError> {
        let mut stream = self.open()?;
        send_request(&mut stream, "host:devices")?;
        let payload = read_length_prefixed(&mut stream)?;
        Ok(parse_devices(&payload))
    }

    /// State of a single device; an unlisted serial is reported as rejected.
    pub fn device_state(&self, serial: &str) -> Result<DeviceState, DeviceQueryError> {
        self.devices()?
            .into_iter()
            .find(|(s, _)| s == serial)
            .map(|(_, state)| state)
            .ok_or_else(|| DeviceQueryError::Rejected(format!("device '{serial}' not found")))
    }

    /// Run `command` on the device and collect its output until EOF.
    pub fn shell(&self, serial: &str, command: &str) -> Result<String, DeviceQueryError> {
        let mut stream = self.open()?;
        send_request(&mut stream, &format!("host:transport:{serial}"))?;
        send_request(&mut stream, &format!("shell:{command}"))?;

        let mut output = Vec::new();
        match stream.read_to_end(&mut output) {
            Ok(_) => {
                trace!(serial, command, bytes = output.len(), "shell command finished");
                Ok(String::from_utf8_lossy(&output).into_owned())
            }
            Err(e) if is_timeout(&e) => Err(DeviceQueryError::Unresponsive(format!(
                "'{command}' produced no output for {:?}",
                self.timeout
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Pids of the debuggable processes currently known to the device.
    pub fn jdwp_pids(&self, serial: &str) -> Result<Vec<i32>, DeviceQueryError> {
        let mut stream = self.open()?;
        send_request(&mut stream, &format!("host:transport:{serial}"))?;
        send_request(&mut stream, "jdwp")?;
        // The service keeps pushing updates; the first message is the current list.
        let payload = read_length_prefixed(&mut stream)?;
        Ok(parse_jdwp(&payload))
    }

    fn open(&self) -> Result<TcpStream, DeviceQueryError> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }
}

/// A device reached through an [`AdbServer`].
///
/// Properties are read once with `getprop` when connecting; state and
/// clients are queried live.
pub struct AdbDevice {
    server: AdbServer,
    serial: String,
    props: HashMap<String, String>,
}

impl AdbDevice {
    pub fn connect(server: AdbServer, serial: &str) -> Result<Self, DeviceQueryError> {
        let state = server.device_state(serial)?;
        if !state.is_online() {
            return Err(DeviceQueryError::Rejected(format!(
                "device '{serial}' is {state}"
            )));
        }
        let props = parse_getprop(&server.shell(serial, "getprop")?);
        debug!(serial, properties = props.len(), "connected to device");
        Ok(Self {
            server,
            serial: serial.to_string(),
            props,
        })
    }

    /// Connect to the first online device reported by the server.
    pub fn connect_first(server: AdbServer) -> Result<Self, DeviceQueryError> {
        let serial = server
            .devices()?
            .into_iter()
            .find(|(_, state)| state.is_online())
            .map(|(serial, _)| serial)
            .ok_or_else(|| DeviceQueryError::Rejected("no online device attached".to_string()))?;
        Self::connect(server, &serial)
    }

    fn prop(&self, name: &str) -> Option<String> {
        self.props.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

impl DeviceHandle for AdbDevice {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn name(&self) -> String {
        match (self.prop(PROP_MANUFACTURER), self.prop(PROP_MODEL)) {
            (Some(manufacturer), Some(model)) => format!("{manufacturer} {model}"),
            (None, Some(model)) => model,
            _ => self.serial.clone(),
        }
    }

    fn state(&self) -> Result<DeviceState, DeviceQueryError> {
        // A serial missing from the listing has been detached.
        Ok(self
            .server
            .devices()?
            .into_iter()
            .find(|(serial, _)| *serial == self.serial)
            .map_or(DeviceState::Disconnected, |(_, state)| state))
    }

    fn version(&self) -> AndroidVersion {
        AndroidVersion {
            api_level: self
                .prop(PROP_SDK)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            codename: self.prop(PROP_CODENAME).filter(|c| c != "REL"),
            release: self.prop(PROP_RELEASE),
        }
    }

    fn abis(&self) -> Vec<String> {
        match self.prop(PROP_ABI_LIST) {
            Some(list) => list.split(',').map(|a| a.trim().to_string()).collect(),
            None => self.prop(PROP_ABI).into_iter().collect(),
        }
    }

    fn model(&self) -> Option<String> {
        self.prop(PROP_MODEL)
    }

    fn manufacturer(&self) -> Option<String> {
        self.prop(PROP_MANUFACTURER)
    }

    fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
            || PROP_QEMU.iter().any(|p| self.prop(p).as_deref() == Some("1"))
    }

    fn avd_name(&self) -> Option<String> {
        PROP_AVD_NAMES.iter().find_map(|p| self.prop(p))
    }

    fn clients(&self) -> Result<Vec<ClientInfo>, DeviceQueryError> {
        let pids = self.server.jdwp_pids(&self.serial)?;
        if pids.is_empty() {
            return Ok(Vec::new());
        }
        let names = parse_ps(&self.server.shell(&self.serial, PS_COMMAND)?);
        Ok(pids
            .into_iter()
            .map(|pid| {
                let description = names
                    .get(&pid)
                    .filter(|name| name.as_str() != PRE_INITIALIZED)
                    .cloned();
                // "com.example:remote" belongs to package "com.example".
                let package_name = description
                    .as_deref()
                    .and_then(|d| d.split(':').next())
                    .map(str::to_string);
                ClientInfo {
                    pid,
                    package_name,
                    description,
                    abi: None,
                }
            })
            .collect())
    }

    fn execute_shell_command(&self, command: &str) -> Result<String, DeviceQueryError> {
        self.server.shell(&self.serial, command)
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

fn send_request<S: Read + Write>(stream: &mut S, request: &str) -> Result<(), DeviceQueryError> {
    if request.len() > MAX_REQUEST_LEN {
        return Err(DeviceQueryError::Rejected(format!(
            "request too long ({} bytes)",
            request.len()
        )));
    }
    stream.write_all(format!("{:04x}{request}", request.len()).as_bytes())?;
    read_status(stream)
}

fn read_status<R: Read>(stream: &mut R) -> Result<(), DeviceQueryError> {
    let mut status = [0u8; 4];
    stream.read_exact(&mut status)?;
    match &status {
        b"OKAY" => Ok(()),
        b"FAIL" => {
            let message = read_length_prefixed(stream)
                .unwrap_or_else(|_| "unknown ADB failure".to_string());
            Err(DeviceQueryError::Rejected(message))
        }
        other => Err(DeviceQueryError::Io(format!(
            "unexpected ADB status '{}'",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn read_length_prefixed<R: Read>(stream: &mut R) -> Result<String, DeviceQueryError> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let len = std::str::from_utf8(&prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            DeviceQueryError::Io(format!(
                "malformed length prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ))
        })?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}

fn parse_devices(payload: &str) -> Vec<(String, DeviceState)> {
    payload
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some((serial.to_string(), DeviceState::from_adb(state)))
        })
        .collect()
}

/// Parse `getprop` output lines of the form `[key]: [value]`.
fn parse_getprop(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_ps(output: &str) -> HashMap<i32, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let name = fields.collect::<Vec<_>>().join(" ");
            (!name.is_empty()).then_some((pid, name))
        })
        .collect()
}

fn parse_jdwp(payload: &str) -> Vec<i32> {
    payload
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
