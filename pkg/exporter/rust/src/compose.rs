// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Building metric sources from the registered collector factories.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use prometheus::core::Collector;

use crate::query::QueryClient;
use crate::registry::Registry;

/// Metrics produced by one collection, ready to be registered for a scrape.
pub type Metrics = Vec<Box<dyn Collector>>;

/// Something that produces a snapshot of metrics on demand.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails: problems are reported through the metrics themselves
    /// (an `up` gauge, failure counters) and the log.
    async fn collect(&self) -> Metrics;

    /// Last known values, marked down, served when `collect` overran the
    /// scrape timeout.
    fn stale(&self) -> Metrics {
        Vec::new()
    }
}

/// Builds a metric source against a live query client.
pub type CollectorFactory =
    Arc<dyn Fn(Arc<dyn QueryClient>) -> anyhow::Result<Arc<dyn MetricSource>> + Send + Sync>;

/// Instantiate every registered factory against `client`. A failing factory
/// only removes its own source.
pub fn compose_from_connection(
    factories: &Registry<CollectorFactory>,
    client: Arc<dyn QueryClient>,
) -> Vec<Arc<dyn MetricSource>> {
    let mut sources = Vec::new();

    for (name, factory) in factories.get_all() {
        match factory(Arc::clone(&client)) {
            Ok(source) => {
                info!("Built collector {name}");
                sources.push(source);
            }
            Err(e) => error!("Failed to build collector {name}: {e:#}"),
        }
    }

    sources
}
