// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Wire schema of the `profiler.proto.TransportService`.
//!
//! The messages mirror `proto/profiler.proto`; the service client, server
//! and [`TRANSPORT_METHODS`] are generated from its rpc declarations. The
//! proxy is a client of this service (relay) and a server of the same shape
//! to its own subscribers, so both sides share these messages.

include!(concat!(env!("OUT_DIR"), "/profiler.proto.TransportService.rs"));
include!(concat!(env!("OUT_DIR"), "/transport_methods.rs"));

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Device {
    #[prost(int64, tag = "1")]
    pub device_id: i64,
    #[prost(string, tag = "2")]
    pub serial: String,
    /// Display label: device model, or AVD name for emulators.
    #[prost(string, tag = "3")]
    pub model: String,
    #[prost(string, tag = "4")]
    pub manufacturer: String,
    #[prost(bool, tag = "5")]
    pub is_emulator: bool,
    #[prost(string, tag = "6")]
    pub boot_id: String,
    #[prost(string, tag = "7")]
    pub version: String,
    #[prost(int32, tag = "8")]
    pub api_level: i32,
    #[prost(int32, tag = "9")]
    pub feature_level: i32,
    #[prost(string, tag = "10")]
    pub codename: String,
    #[prost(enumeration = "device::State", tag = "11")]
    pub state: i32,
    #[prost(string, repeated, tag = "12")]
    pub abis: Vec<String>,
}

pub mod device {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum State {
        Unspecified = 0,
        Online = 1,
        Offline = 2,
        Disconnected = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Process {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub pid: i32,
    #[prost(int64, tag = "3")]
    pub device_id: i64,
    #[prost(enumeration = "process::State", tag = "4")]
    pub state: i32,
    #[prost(int64, tag = "5")]
    pub start_timestamp_ns: i64,
    #[prost(string, tag = "6")]
    pub abi_cpu_arch: String,
}

pub mod process {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum State {
        Unspecified = 0,
        Alive = 1,
        Dead = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessStarted {
    #[prost(message, optional, tag = "1")]
    pub process: Option<Process>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessData {
    #[prost(oneof = "process_data::Union", tags = "1")]
    pub union: Option<process_data::Union>,
}

pub mod process_data {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Union {
        #[prost(message, tag = "1")]
        ProcessStarted(super::ProcessStarted),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AgentData {
    #[prost(enumeration = "agent_data::Status", tag = "1")]
    pub status: i32,
}

pub mod agent_data {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Status {
        Unspecified = 0,
        Attached = 1,
        Unattachable = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EchoData {
    #[prost(string, tag = "1")]
    pub data: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(int32, tag = "1")]
    pub pid: i32,
    /// Correlates a start with its later end; the pid for PROCESS events.
    #[prost(int64, tag = "2")]
    pub group_id: i64,
    #[prost(enumeration = "event::Kind", tag = "3")]
    pub kind: i32,
    #[prost(bool, tag = "4")]
    pub is_ended: bool,
    /// Device time in nanoseconds.
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
    #[prost(oneof = "event::Union", tags = "10, 11, 12")]
    pub union: Option<event::Union>,
}

pub mod event {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        None = 0,
        Process = 1,
        Agent = 2,
        Echo = 3,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Union {
        #[prost(message, tag = "10")]
        Process(super::ProcessData),
        #[prost(message, tag = "11")]
        AgentData(super::AgentData),
        #[prost(message, tag = "12")]
        Echo(super::EchoData),
    }
}

impl Event {
    /// The process carried by a PROCESS "started" event, if any.
    pub fn started_process(&self) -> Option<&Process> {
        match &self.union {
            Some(event::Union::Process(ProcessData {
                union: Some(process_data::Union::ProcessStarted(started)),
            })) => started.process.as_ref(),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TimeRequest {
    #[prost(int64, tag = "1")]
    pub stream_id: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TimeResponse {
    #[prost(int64, tag = "1")]
    pub timestamp_ns: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct VersionRequest {
    #[prost(int64, tag = "1")]
    pub stream_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionResponse {
    #[prost(string, tag = "1")]
    pub version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesRequest {
    #[prost(int64, tag = "1")]
    pub stream_id: i64,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub contents: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(enumeration = "command::CommandType", tag = "1")]
    pub command_type: i32,
    #[prost(int32, tag = "2")]
    pub pid: i32,
    #[prost(int64, tag = "3")]
    pub stream_id: i64,
    #[prost(string, tag = "4")]
    pub echo_data: String,
}

pub mod command {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum CommandType {
        Unspecified = 0,
        Echo = 1,
        AttachAgent = 2,
        BeginSession = 3,
        EndSession = 4,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteRequest {
    #[prost(message, optional, tag = "1")]
    pub command: Option<Command>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ExecuteResponse {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetDevicesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetDevicesResponse {
    #[prost(message, repeated, tag = "1")]
    pub devices: Vec<Device>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetProcessesRequest {
    #[prost(int64, tag = "1")]
    pub device_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProcessesResponse {
    #[prost(message, repeated, tag = "1")]
    pub processes: Vec<Process>,
}

/// Subscription filter; zero values mean "any".
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetEventsRequest {
    #[prost(enumeration = "event::Kind", tag = "1")]
    pub kind: i32,
    #[prost(int32, tag = "2")]
    pub pid: i32,
    #[prost(int64, tag = "3")]
    pub group_id: i64,
}
