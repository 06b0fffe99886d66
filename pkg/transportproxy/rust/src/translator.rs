// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Device snapshot translation
//!
//! Turns a live [`DeviceHandle`] into the immutable [`proto::Device`] record
//! owned by a proxy. Missing metadata degrades to [`UNKNOWN_LABEL`]; only the
//! boot-id probe can fail the translation.

use crate::device::DeviceHandle;
use crate::error::DeviceQueryError;
use crate::proto;
use tracing::debug;

/// Label used whenever a display attribute is missing.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Shell command printing the kernel's per-boot random id.
pub const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Build the canonical record for `device`.
///
/// Runs the boot-id probe exactly once; its failure is returned unchanged.
pub fn device_record(device: &dyn DeviceHandle) -> Result<proto::Device, DeviceQueryError> {
    let serial = device.serial();
    let boot_id = probe_boot_id(device, &serial)?;
    let version = device.version();

    let label = if device.is_emulator() {
        device.avd_name()
    } else {
        device.model()
    };

    let mut record = proto::Device {
        device_id: stable_device_id(&serial, &boot_id),
        serial,
        model: non_empty_or_unknown(label),
        manufacturer: non_empty_or_unknown(device.manufacturer()),
        is_emulator: device.is_emulator(),
        boot_id,
        version: version.release.clone().unwrap_or_default(),
        api_level: version.api_level,
        feature_level: version.feature_level(),
        codename: version.codename.clone().unwrap_or_default(),
        state: 0,
        abis: device.abis(),
    };
    record.set_state(device.state()?.into());

    debug!(
        serial = %record.serial,
        device_id = record.device_id,
        model = %record.model,
        api_level = record.api_level,
        "translated device"
    );
    Ok(record)
}

fn probe_boot_id(device: &dyn DeviceHandle, serial: &str) -> Result<String, DeviceQueryError> {
    let output = device.execute_shell_command(BOOT_ID_COMMAND)?;
    let boot_id = output.trim();
    if boot_id.is_empty() {
        debug!(serial, "empty boot id, falling back to serial");
        return Ok(serial.to_string());
    }
    Ok(boot_id.to_string())
}

fn non_empty_or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// FNV-1a over serial and boot id: stable across proxy restarts, distinct
/// across reboots of the same device.
pub fn stable_device_id(serial: &str, boot_id: &str) -> i64 {
    let hash = serial
        .bytes()
        .chain(std::iter::once(0))
        .chain(boot_id.bytes())
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    hash as i64
}
