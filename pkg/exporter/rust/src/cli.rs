// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command line surface shared by the exporter binaries, and the serve loop
//! they both run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::compose::MetricSource;
use crate::config::{ServeConfig, load_config, search_paths};
use crate::server::MetricsServer;

/// Flags of the `serve` command. Every flag can also be set through an
/// `MNE_` environment variable; unset flags leave the config file value.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address the metrics endpoint listens on (host:port)
    #[arg(long, env = "MNE_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Connect to the node over TLS instead of plaintext
    #[arg(
        long,
        env = "MNE_TLS",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub tls: Option<bool>,

    /// Path to a YAML config file
    #[arg(long, env = "MNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short = 'l', long, env = "MNE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Directory holding the aggregate caches
    #[arg(long, env = "MNE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of concurrent queries per collection
    #[arg(long, env = "MNE_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Attempts for each external HTTP request
    #[arg(long, env = "MNE_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Seconds allowed for probing a candidate endpoint
    #[arg(long, env = "MNE_PROBE_TIMEOUT")]
    pub probe_timeout: Option<u64>,

    /// Seconds allowed for each query to the node
    #[arg(long, env = "MNE_RPC_TIMEOUT")]
    pub rpc_timeout: Option<u64>,

    /// Seconds a collector may take before it is left out of a scrape
    #[arg(long, env = "MNE_SCRAPE_TIMEOUT")]
    pub scrape_timeout: Option<u64>,

    /// Seconds to wait for in-flight scrapes on shutdown
    #[arg(long, env = "MNE_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Option<u64>,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut ServeConfig) {
        if let Some(listen_address) = &self.listen_address {
            config.listen_address = listen_address.clone();
        }
        if let Some(tls) = self.tls {
            config.tls = tls;
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }

        for (flag, field) in [
            (self.probe_timeout, &mut config.probe_timeout),
            (self.rpc_timeout, &mut config.rpc_timeout),
            (self.scrape_timeout, &mut config.scrape_timeout),
            (self.shutdown_timeout, &mut config.shutdown_timeout),
        ] {
            if let Some(secs) = flag {
                *field = Duration::from_secs(secs);
            }
        }
    }

    /// Defaults, then the config file, then these flags. The result is
    /// validated.
    pub fn resolve(&self, app_name: &str) -> Result<ServeConfig> {
        let mut config = load_config(self.config.as_deref(), &search_paths(app_name))?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Cancel `token` on the first SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });

    Ok(())
}

/// Publish `sources` until `token` is cancelled or the server fails, then
/// shut the server down within the configured timeout.
pub async fn serve_until_cancelled(
    config: &ServeConfig,
    sources: Vec<Arc<dyn MetricSource>>,
    token: CancellationToken,
) -> Result<()> {
    let mut server = MetricsServer::new(config.bind_address(), sources, config.scrape_timeout);
    let mut errors = server.start().await;

    let failure = tokio::select! {
        Some(err) = errors.recv() => Some(err),
        _ = token.cancelled() => None,
    };
    token.cancel();

    if let Err(e) = server.shutdown(config.shutdown_timeout).await {
        error!("{e}");
    }

    match failure {
        Some(err) => Err(err).context("metrics server failed"),
        None => Ok(()),
    }
}
