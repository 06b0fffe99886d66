// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process Registry
//! Live set of observable processes on one device, keyed by pid

use crate::device::{ClientInfo, cpu_arch_for_abi};
use crate::proto::{self, Event, Process, event, process};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Tracks qualifying clients and computes their start/end transitions.
///
/// A vanished process stays in the map as DEAD until [`ProcessRegistry::reap`]
/// runs. Not synchronized; the owner serializes every mutation together with
/// the publication of the events it returns.
#[derive(Debug)]
pub struct ProcessRegistry {
    device_id: i64,
    default_abi: Option<String>,
    processes: BTreeMap<i32, Process>,
}

impl ProcessRegistry {
    pub fn new(device: &proto::Device) -> Self {
        Self {
            device_id: device.device_id,
            default_abi: device.abis.first().cloned(),
            processes: BTreeMap::new(),
        }
    }

    /// Reconcile with the device's current client list.
    ///
    /// Returns the "started" events for newly tracked processes followed by
    /// the "ended" events for vanished ones.
    pub fn refresh(&mut self, clients: &[ClientInfo], now_ns: i64) -> Vec<Event> {
        let mut events = Vec::new();

        for client in clients {
            if !client.is_qualifying() || self.processes.contains_key(&client.pid) {
                continue;
            }
            let record = self.new_record(client, now_ns);
            info!(pid = record.pid, name = %record.name, "process started");
            events.push(process_started_event(&record, now_ns));
            self.processes.insert(record.pid, record);
        }

        let present: HashSet<i32> = clients.iter().map(|c| c.pid).collect();
        let vanished: Vec<i32> = self
            .alive()
            .map(|p| p.pid)
            .filter(|pid| !present.contains(pid))
            .collect();
        for pid in vanished {
            events.extend(self.retire(pid, now_ns));
        }

        events
    }

    /// Force every tracked process DEAD, returning one "ended" event each.
    pub fn shutdown(&mut self, now_ns: i64) -> Vec<Event> {
        let pids: Vec<i32> = self.alive().map(|p| p.pid).collect();
        if !pids.is_empty() {
            debug!(count = pids.len(), "ending all tracked processes");
        }
        pids.into_iter()
            .filter_map(|pid| self.retire(pid, now_ns))
            .collect()
    }

    /// Remove DEAD records. Call only once their "ended" events are published.
    pub fn reap(&mut self) -> usize {
        let before = self.processes.len();
        self.processes.retain(|_, p| p.state() != process::State::Dead);
        before - self.processes.len()
    }

    /// ALIVE processes keyed by pid.
    pub fn snapshot(&self) -> BTreeMap<i32, Process> {
        self.alive().map(|p| (p.pid, p.clone())).collect()
    }

    /// "started" events for the live set, stamped with each start time.
    pub fn started_events(&self) -> Vec<Event> {
        self.alive()
            .map(|p| process_started_event(p, p.start_timestamp_ns))
            .collect()
    }

    fn alive(&self) -> impl Iterator<Item = &Process> {
        self.processes
            .values()
            .filter(|p| p.state() == process::State::Alive)
    }

    fn new_record(&self, client: &ClientInfo, now_ns: i64) -> Process {
        let abi = client.abi.as_deref().or(self.default_abi.as_deref());
        let mut record = Process {
            name: client.description.clone().unwrap_or_default(),
            pid: client.pid,
            device_id: self.device_id,
            state: 0,
            start_timestamp_ns: now_ns,
            abi_cpu_arch: abi.map(cpu_arch_for_abi).unwrap_or_default().to_string(),
        };
        record.set_state(process::State::Alive);
        record
    }

    fn retire(&mut self, pid: i32, now_ns: i64) -> Option<Event> {
        let record = self
            .processes
            .get_mut(&pid)
            .filter(|p| p.state() == process::State::Alive)?;
        record.set_state(process::State::Dead);
        info!(pid, name = %record.name, "process ended");
        Some(process_ended_event(pid, now_ns))
    }
}

pub fn process_started_event(process: &Process, timestamp: i64) -> Event {
    Event {
        pid: process.pid,
        group_id: i64::from(process.pid),
        kind: event::Kind::Process as i32,
        is_ended: false,
        timestamp,
        union: Some(event::Union::Process(proto::ProcessData {
            union: Some(proto::process_data::Union::ProcessStarted(
                proto::ProcessStarted {
                    process: Some(process.clone()),
                },
            )),
        })),
    }
}

pub fn process_ended_event(pid: i32, timestamp: i64) -> Event {
    Event {
        pid,
        group_id: i64::from(pid),
        kind: event::Kind::Process as i32,
        is_ended: true,
        timestamp,
        union: None,
    }
}
