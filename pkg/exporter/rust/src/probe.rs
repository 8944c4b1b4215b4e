// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Protocol validation of candidate listening sockets.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, TlsPolicy};
use crate::discovery::dial_address;
use crate::query::{GrpcQueryClient, QueryClient};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Answers whether a socket speaks the expected protocol.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, endpoint: SocketAddr) -> bool;
}

/// Dials the socket and asks the node for its status. The timeout covers
/// dial and call together so an open but silent port cannot stall discovery.
pub struct GrpcProbe {
    tls: TlsPolicy,
    timeout: Duration,
    token: CancellationToken,
}

impl GrpcProbe {
    pub fn new(tls: TlsPolicy, timeout: Duration, token: CancellationToken) -> Self {
        Self {
            tls,
            timeout,
            token,
        }
    }
}

#[async_trait]
impl EndpointProbe for GrpcProbe {
    async fn probe(&self, endpoint: SocketAddr) -> bool {
        let target = dial_address(endpoint);

        let attempt = async {
            let connection =
                match Connection::open(target, self.tls, self.timeout, self.token.child_token())
                    .await
                {
                    Ok(connection) => connection,
                    Err(e) => {
                        debug!("Probe of {target} failed: {e}");
                        return false;
                    }
                };

            match GrpcQueryClient::new(connection, self.timeout)
                .node_status()
                .await
            {
                Ok(status) => {
                    debug!(
                        "gRPC port {target} is ready and responding at height {}",
                        status.height
                    );
                    true
                }
                Err(e) => {
                    debug!("Probe of {target} failed: {e}");
                    false
                }
            }
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(valid) => valid,
            Err(_) => {
                debug!("Probe of {target} timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
