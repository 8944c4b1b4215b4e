// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::compose::{CollectorFactory, MetricSource, compose_from_connection};
use crate::connection::{Connection, TlsPolicy};
use crate::discovery::{ProcessDescriptor, ProcessTable, detect};
use crate::errors::DetectError;
use crate::monitor::Monitor;
use crate::probe::EndpointProbe;
use crate::query::GrpcQueryClient;
use crate::registry::Registry;

pub const PROCESS_NAME: &str = "manifestd";
pub const DEFAULT_GRPC_PORT: u16 = 9090;

/// Monitors the `manifestd` node daemon over its gRPC query endpoint.
pub struct ManifestdMonitor {
    table: Arc<dyn ProcessTable>,
    probe: Arc<dyn EndpointProbe>,
    factories: Arc<Registry<CollectorFactory>>,
    tls: TlsPolicy,
    rpc_timeout: Duration,
    token: CancellationToken,
}

impl ManifestdMonitor {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        probe: Arc<dyn EndpointProbe>,
        factories: Arc<Registry<CollectorFactory>>,
        tls: TlsPolicy,
        rpc_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            table,
            probe,
            factories,
            tls,
            rpc_timeout,
            token,
        }
    }
}

#[async_trait]
impl Monitor for ManifestdMonitor {
    fn name(&self) -> &str {
        PROCESS_NAME
    }

    async fn detect(&self) -> Result<Option<ProcessDescriptor>, DetectError> {
        detect(
            self.table.as_ref(),
            self.probe.as_ref(),
            PROCESS_NAME,
            Some(DEFAULT_GRPC_PORT),
        )
        .await
    }

    async fn sources(
        &self,
        process: &ProcessDescriptor,
    ) -> anyhow::Result<Vec<Arc<dyn MetricSource>>> {
        let connection = Connection::open(
            process.target(),
            self.tls,
            self.rpc_timeout,
            self.token.child_token(),
        )
        .await
        .with_context(|| format!("failed to connect to {PROCESS_NAME} (pid {})", process.pid))?;

        let client = Arc::new(GrpcQueryClient::new(connection, self.rpc_timeout));
        Ok(compose_from_connection(&self.factories, client))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::discovery::tests::{FakeProbe, FakeTable, any};
    use std::net::{IpAddr, Ipv4Addr};

    fn monitor(table: FakeTable, probe: FakeProbe) -> ManifestdMonitor {
        ManifestdMonitor::new(
            Arc::new(table),
            Arc::new(probe),
            Arc::new(Registry::new("collector factory")),
            TlsPolicy::Plaintext,
            Duration::from_millis(500),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_detect_prefers_grpc_port() {
        let manifestd = monitor(
            FakeTable {
                process: Some(1234),
                endpoints: vec![any(26657), any(9090), any(1317)],
            },
            FakeProbe::accepting(&[9090, 1317]),
        );

        let process = manifestd.detect().await.unwrap().unwrap();
        assert_eq!(process.pid, 1234);
        assert_eq!(process.port, 9090);
    }

    #[tokio::test]
    async fn test_sources_fail_when_node_is_gone() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manifestd = monitor(
            FakeTable {
                process: None,
                endpoints: Vec::new(),
            },
            FakeProbe::default(),
        );
        let process = ProcessDescriptor {
            pid: 1234,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        };

        let err = manifestd.sources(&process).await.err().unwrap();
        assert!(format!("{err:#}").contains("manifestd"));
    }
}
