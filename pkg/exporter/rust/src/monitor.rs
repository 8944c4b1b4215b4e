// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Monitors detect one kind of node process and build the metric sources
//! attached to it.

pub mod manifestd;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::compose::MetricSource;
use crate::discovery::ProcessDescriptor;
use crate::errors::DetectError;
use crate::registry::Registry;

#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the process is not running.
    async fn detect(&self) -> Result<Option<ProcessDescriptor>, DetectError>;

    async fn sources(
        &self,
        process: &ProcessDescriptor,
    ) -> anyhow::Result<Vec<Arc<dyn MetricSource>>>;
}

/// Run every registered monitor and gather the sources they produce.
/// Failures stay within the monitor that raised them; only an empty
/// registry is an error.
pub async fn setup_monitors(
    monitors: &Registry<Arc<dyn Monitor>>,
) -> anyhow::Result<Vec<Arc<dyn MetricSource>>> {
    let registered = monitors.get_all();
    if registered.is_empty() {
        bail!("no registered monitors found");
    }

    info!("Registered monitors: {}", registered.len());
    for (name, _) in &registered {
        debug!("Monitor {name}");
    }

    let mut sources = Vec::new();
    for (name, monitor) in registered {
        info!("Attempting to detect process {name}");
        let process = match monitor.detect().await {
            Ok(Some(process)) => process,
            Ok(None) => continue,
            Err(e) => {
                error!("Failed to detect process {name}: {e}");
                continue;
            }
        };

        match monitor.sources(&process).await {
            Ok(found) => sources.extend(found),
            Err(e) => error!("Failed to build collectors for {name}: {e:#}"),
        }
    }

    if sources.is_empty() {
        warn!("No collectors found for any registered monitors");
    }

    Ok(sources)
}
