// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Finding a named process and the one listening socket that answers the
//! node's query protocol.

pub mod netns;
pub mod procfs;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{debug, info, warn};

use crate::errors::DetectError;
use crate::probe::EndpointProbe;

pub use procfs::ProcFs;

/// A TCP socket in LISTEN state owned by a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenEndpoint {
    pub address: IpAddr,
    pub port: u16,
}

impl ListenEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Result of a successful detection: the process and its validated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: i32,
    pub address: IpAddr,
    pub port: u16,
}

impl ProcessDescriptor {
    /// Address to dial to reach the validated endpoint.
    pub fn target(&self) -> SocketAddr {
        dial_address(SocketAddr::new(self.address, self.port))
    }
}

/// Wildcard listen addresses are reached through loopback.
pub fn dial_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// OS process introspection.
pub trait ProcessTable: Send + Sync {
    /// PID of a process whose name equals `name` exactly. When several
    /// match, the lowest PID is returned.
    fn find_process(&self, name: &str) -> io::Result<Option<i32>>;

    /// TCP sockets in LISTEN state owned by `pid`, in enumeration order.
    fn listen_endpoints(&self, pid: i32) -> io::Result<Vec<ListenEndpoint>>;
}

/// Order probe candidates: sockets on `default_port` first, then every
/// other socket in enumeration order.
pub fn order_candidates(
    endpoints: &[ListenEndpoint],
    default_port: Option<u16>,
) -> Vec<ListenEndpoint> {
    let (mut preferred, rest): (Vec<_>, Vec<_>) = endpoints
        .iter()
        .copied()
        .partition(|endpoint| Some(endpoint.port) == default_port);
    preferred.extend(rest);
    preferred
}

/// Detect `name` and validate one of its listening sockets.
///
/// Returns `Ok(None)` when no such process runs. A process that listens
/// nowhere, or whose sockets all fail the probe, is an error.
pub async fn detect(
    table: &dyn ProcessTable,
    probe: &dyn EndpointProbe,
    name: &str,
    default_port: Option<u16>,
) -> Result<Option<ProcessDescriptor>, DetectError> {
    let Some(pid) = table.find_process(name).map_err(DetectError::ProcessList)? else {
        info!("Process not found: {name}");
        return Ok(None);
    };
    debug!("Found process {name} with pid {pid}");

    let endpoints = table
        .listen_endpoints(pid)
        .map_err(|source| DetectError::PortEnumeration {
            name: name.to_string(),
            pid,
            source,
        })?;

    if endpoints.is_empty() {
        warn!("Process {name} (pid {pid}) found but no listening ports detected");
        return Err(DetectError::NoListenPorts {
            name: name.to_string(),
            pid,
        });
    }

    for endpoint in order_candidates(&endpoints, default_port) {
        let target = endpoint.socket_addr();
        if probe.probe(target).await {
            debug!("gRPC connection successful: {target}");
            return Ok(Some(ProcessDescriptor {
                pid,
                address: endpoint.address,
                port: endpoint.port,
            }));
        }

        if Some(endpoint.port) == default_port {
            warn!("gRPC connection failed on default port: {target}");
        } else {
            warn!("gRPC connection failed: {target}");
        }
    }

    Err(DetectError::NoReachableEndpoint {
        name: name.to_string(),
        pid,
    })
}
