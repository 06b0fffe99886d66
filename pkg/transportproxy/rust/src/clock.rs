// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Instant;

/// Device-time source for synthetic event timestamps.
///
/// Anchored once to a device timestamp and advanced with the local
/// monotonic clock, so timestamps never go backwards.
#[derive(Debug, Clone, Copy)]
pub struct DeviceClock {
    base_ns: i64,
    anchor: Instant,
}

impl DeviceClock {
    pub fn anchored(device_now_ns: i64) -> Self {
        Self {
            base_ns: device_now_ns,
            anchor: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.base_ns.saturating_add(elapsed)
    }
}
