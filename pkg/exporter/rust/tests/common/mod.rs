// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

pub mod node;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mne_exporter::MetricSource;
use mne_exporter::errors::{FeedError, QueryError};
use mne_exporter::feed::AddressFeed;
use mne_exporter::query::{Coin, DecCoin, QueryClient, StatusResponse, Validator};
use mne_exporter::server::MetricsServer;

/// How the fake node answers for one address.
#[derive(Clone)]
pub enum Reply {
    Balance(&'static str),
    Fail,
    Hang,
}

/// Bank module of a fake node, answering `Balance` from a script that tests
/// can change between scrapes.
#[derive(Default)]
pub struct FakeBank {
    replies: Mutex<HashMap<String, Reply>>,
}

impl FakeBank {
    pub fn new(replies: &[(&str, Reply)]) -> Self {
        let bank = Self::default();
        bank.set(replies);
        bank
    }

    pub fn set(&self, replies: &[(&str, Reply)]) {
        let mut current = self.replies.lock().unwrap();
        for (address, reply) in replies {
            current.insert(address.to_string(), reply.clone());
        }
    }
}

#[async_trait]
impl QueryClient for FakeBank {
    async fn node_status(&self) -> Result<StatusResponse, QueryError> {
        Ok(StatusResponse::default())
    }

    async fn validators(&self) -> Result<Vec<Validator>, QueryError> {
        Ok(Vec::new())
    }

    async fn validator_outstanding_rewards(
        &self,
        _validator_address: &str,
    ) -> Result<Vec<DecCoin>, QueryError> {
        Ok(Vec::new())
    }

    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, QueryError> {
        let reply = self.replies.lock().unwrap().get(address).cloned();
        match reply {
            Some(Reply::Balance(amount)) => Ok(Coin {
                denom: denom.to_string(),
                amount: amount.to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(QueryError::Timeout(Duration::from_secs(3600)))
            }
            Some(Reply::Fail) | None => Err(QueryError::Rpc(tonic::Status::unavailable(
                "node is catching up",
            ))),
        }
    }
}

/// Address feed returning a fixed list, or failing when none is set.
#[derive(Default)]
pub struct FakeFeed {
    addresses: Mutex<Option<Vec<String>>>,
}

impl FakeFeed {
    pub fn listing(addresses: &[&str]) -> Self {
        let feed = Self::default();
        feed.set(Some(addresses));
        feed
    }

    pub fn set(&self, addresses: Option<&[&str]>) {
        *self.addresses.lock().unwrap() =
            addresses.map(|list| list.iter().map(|a| a.to_string()).collect());
    }
}

#[async_trait]
impl AddressFeed for FakeFeed {
    async fn addresses(&self) -> Result<Vec<String>, FeedError> {
        self.addresses
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FeedError::Status {
                url: "http://feed.invalid/addresses".to_string(),
                status: 503,
            })
    }
}

/// Start a metrics server on an ephemeral local port.
pub async fn start_server(
    sources: Vec<Arc<dyn MetricSource>>,
    scrape_timeout: Duration,
) -> (MetricsServer, SocketAddr) {
    let mut server = MetricsServer::new("127.0.0.1:0", sources, scrape_timeout);
    let mut errors = server.start().await;
    assert!(errors.try_recv().is_err(), "server failed to start");
    let addr = server.local_addr().unwrap();
    (server, addr)
}

pub async fn scrape(addr: SocketAddr) -> String {
    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.text().await.unwrap()
}

/// Value of the first sample named `name` carrying every label in `labels`.
pub fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.split(['{', ' ']).next() == Some(name))
        .find(|line| {
            labels
                .iter()
                .all(|(label, value)| line.contains(&format!("{label}=\"{value}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
