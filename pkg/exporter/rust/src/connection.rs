// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::errors::ConnectionError;

/// HTTP/2 ping interval on idle connections.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// How long to wait for a ping acknowledgement before closing.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// No transport security.
    #[default]
    Plaintext,
    /// TLS, validating the server certificate against the system roots.
    SystemRoots,
}

impl TlsPolicy {
    pub fn from_tls_flag(tls: bool) -> Self {
        if tls {
            TlsPolicy::SystemRoots
        } else {
            TlsPolicy::Plaintext
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            TlsPolicy::Plaintext => "http",
            TlsPolicy::SystemRoots => "https",
        }
    }
}

/// One long-lived gRPC channel to a node.
///
/// The channel multiplexes concurrent calls. Dropping the connection cancels
/// its token, which aborts every call still waiting on it.
#[derive(Debug)]
pub struct Connection {
    target: SocketAddr,
    channel: Channel,
    token: CancellationToken,
}

impl Connection {
    pub async fn open(
        target: SocketAddr,
        tls: TlsPolicy,
        connect_timeout: Duration,
        token: CancellationToken,
    ) -> Result<Self, ConnectionError> {
        let uri = format!("{}://{}", tls.scheme(), target);
        debug!("Dialing gRPC endpoint {uri}");

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|source| ConnectionError::InvalidTarget {
                target: uri.clone(),
                source,
            })?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        if tls == TlsPolicy::SystemRoots {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|source| ConnectionError::Tls {
                    target: uri.clone(),
                    source,
                })?;
        }

        let channel = tokio::select! {
            _ = token.cancelled() => {
                return Err(ConnectionError::Cancelled { target: uri });
            }
            result = endpoint.connect() => {
                result.map_err(|source| ConnectionError::Dial { target: uri.clone(), source })?
            }
        };

        info!("Connected to gRPC endpoint {uri}");
        Ok(Self {
            target,
            channel,
            token,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
