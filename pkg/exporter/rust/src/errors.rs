// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("failed to list processes: {0}")]
    ProcessList(#[source] std::io::Error),

    #[error("failed to get listening ports for {name} (pid {pid}): {source}")]
    PortEnumeration {
        name: String,
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} process found (pid {pid}) but has no listening ports")]
    NoListenPorts { name: String, pid: i32 },

    #[error("no gRPC connection found for {name} process (pid {pid})")]
    NoReachableEndpoint { name: String, pid: i32 },
}

/// Raised by the socket table parser for lines it cannot make sense of.
#[derive(Error, Debug)]
pub enum SocketParseError {
    #[error("could not parse socket info: {context}")]
    Malformed { context: String },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("invalid gRPC target {target}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to configure TLS for {target}: {source}")]
    Tls {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("dialing {target} was cancelled")]
    Cancelled { target: String },
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("gRPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("gRPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gRPC call cancelled")]
    Cancelled,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Per sub-target failure of an aggregating collector.
#[derive(Error, Debug)]
pub enum AmountError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("unexpected denom, expected {expected}, got {got}")]
    Denom { expected: String, got: String },

    #[error("invalid coin amount {0:?}")]
    Amount(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache entry {key} has invalid amount {value:?}")]
    InvalidAmount { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics server stopped accepting connections: {0}")]
    Accept(#[source] std::io::Error),

    #[error("metrics server did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid listen-address format, expected host:port: {0}")]
    ListenAddressFormat(String),

    #[error("invalid port in listen-address: {0}")]
    ListenPort(String),

    #[error("invalid host in listen-address: {0}")]
    ListenHost(String),

    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error(transparent)]
    LogLevel(#[from] mne_log::InvalidLevel),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
