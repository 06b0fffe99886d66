// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Generates the `TransportService` client and server from the rpc
//! declarations of `proto/profiler.proto`, plus the list of its routes.
//!
//! Messages are prost derives in `src/proto.rs`, so no protoc is needed.

use std::error::Error;
use std::path::PathBuf;
use tonic_build::manual::{Builder, Method, Service};

const SCHEMA: &str = "proto/profiler.proto";
const SERVICE: &str = "TransportService";
const CODEC: &str = "tonic_prost::ProstCodec";

struct Rpc {
    route: String,
    input: String,
    output: String,
    server_streaming: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed={SCHEMA}");
    println!("cargo:rerun-if-changed=build.rs");

    let schema = strip_comments(&std::fs::read_to_string(SCHEMA)?);
    let package = parse_package(&schema)?;
    let rpcs = parse_rpcs(&schema)?;

    let mut service = Service::builder().name(SERVICE).package(&package);
    for rpc in &rpcs {
        let method = Method::builder()
            .name(snake_case(&rpc.route))
            .route_name(&rpc.route)
            .input_type(format!("crate::proto::{}", rpc.input))
            .output_type(format!("crate::proto::{}", rpc.output))
            .codec_path(CODEC);
        let method = if rpc.server_streaming {
            method.server_streaming().build()
        } else {
            method.build()
        };
        service = service.method(method);
    }
    Builder::new().compile(&[service.build()]);

    let routes: Vec<String> = rpcs.iter().map(|r| format!("{:?}", r.route)).collect();
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    std::fs::write(
        out_dir.join("transport_methods.rs"),
        format!(
            "/// gRPC routes of the transport service, in declaration order.\n\
             pub const TRANSPORT_METHODS: &[&str] = &[{}];\n",
            routes.join(", ")
        ),
    )?;
    Ok(())
}

fn strip_comments(schema: &str) -> String {
    schema
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_package(schema: &str) -> Result<String, String> {
    schema
        .split(';')
        .find_map(|stmt| stmt.trim().strip_prefix("package "))
        .map(|p| p.trim().to_string())
        .ok_or_else(|| format!("{SCHEMA}: missing package declaration"))
}

fn parse_rpcs(schema: &str) -> Result<Vec<Rpc>, String> {
    let start = schema
        .find(&format!("service {SERVICE}"))
        .ok_or_else(|| format!("{SCHEMA}: missing service {SERVICE}"))?;
    let service = &schema[start..];
    let (open, close) = match (service.find('{'), service.find('}')) {
        (Some(open), Some(close)) if open < close => (open, close),
        _ => return Err(format!("{SCHEMA}: malformed service {SERVICE}")),
    };
    service[open + 1..close]
        .split(';')
        .filter(|decl| !decl.trim().is_empty())
        .map(parse_rpc)
        .collect()
}

/// `rpc Route(Input) returns ([stream] Output)`
fn parse_rpc(decl: &str) -> Result<Rpc, String> {
    let tokens: Vec<&str> = decl
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .collect();
    let (route, input, output, server_streaming) = match tokens.as_slice() {
        ["rpc", route, input, "returns", "stream", output] => (route, input, output, true),
        ["rpc", route, input, "returns", output] => (route, input, output, false),
        _ => return Err(format!("{SCHEMA}: unsupported rpc '{}'", decl.trim())),
    };
    Ok(Rpc {
        route: route.to_string(),
        input: input.to_string(),
        output: output.to_string(),
        server_streaming,
    })
}

fn snake_case(route: &str) -> String {
    let mut name = String::with_capacity(route.len() + 4);
    for (i, c) in route.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(c.to_ascii_lowercase());
    }
    name
}
