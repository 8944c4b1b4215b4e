// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use mne_exporter::cli::{ServeArgs, cancel_on_signal, serve_until_cancelled};
use mne_exporter::collectors::DEFAULT_DENOM;
use mne_exporter::collectors::fees::{self, FeesCollector};
use mne_exporter::collectors::geoip::{self, GeoIpCollector, IpBaseProvider};
use mne_exporter::config::ServeConfig;
use mne_exporter::connection::TlsPolicy;
use mne_exporter::discovery::procfs::ProcFs;
use mne_exporter::fanout::FanOut;
use mne_exporter::monitor::manifestd::{self, ManifestdMonitor};
use mne_exporter::probe::GrpcProbe;
use mne_exporter::{CollectorFactory, MetricSource, Monitor, Registry, setup_monitors};

const APP_NAME: &str = "manifest-node-exporter";

#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Prometheus exporter for a local manifestd node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the node and serve its metrics
    Serve(NodeServeArgs),
}

#[derive(Args, Debug)]
struct NodeServeArgs {
    #[command(flatten)]
    serve: ServeArgs,

    /// ipbase.com API key; GeoIP metrics are disabled without one
    #[arg(long, env = "MNE_IPBASE_KEY", hide_env_values = true)]
    ipbase_key: Option<String>,

    /// File holding the last GeoIP lookup
    #[arg(long, env = "MNE_STATE_FILE")]
    state_file: Option<PathBuf>,
}

impl NodeServeArgs {
    fn resolve(&self) -> Result<ServeConfig> {
        let mut config = self.serve.resolve(APP_NAME)?;
        if let Some(key) = &self.ipbase_key {
            config.ipbase_key = key.clone();
        }
        if let Some(state_file) = &self.state_file {
            config.state_file = state_file.clone();
        }
        Ok(config)
    }
}

async fn run(config: ServeConfig, token: CancellationToken) -> Result<()> {
    let tls = TlsPolicy::from_tls_flag(config.tls);
    let fanout = FanOut::new(config.max_concurrency, config.rpc_timeout)
        .with_cycle_timeout(config.cycle_timeout());

    let factories: Registry<CollectorFactory> = Registry::new("collector factory");
    factories.register(
        fees::NAME,
        FeesCollector::factory(DEFAULT_DENOM, &config.cache_dir, fanout),
    );

    let monitors: Registry<Arc<dyn Monitor>> = Registry::new("monitor");
    monitors.register(
        manifestd::PROCESS_NAME,
        Arc::new(ManifestdMonitor::new(
            Arc::new(ProcFs::host()),
            Arc::new(GrpcProbe::new(
                tls,
                config.probe_timeout,
                token.child_token(),
            )),
            Arc::new(factories),
            tls,
            config.rpc_timeout,
            token.child_token(),
        )),
    );

    let mut sources: Vec<Arc<dyn MetricSource>> = setup_monitors(&monitors).await?;

    if config.ipbase_key.is_empty() {
        warn!("No ipbase API key configured, {} collector disabled", geoip::NAME);
    } else {
        let provider = IpBaseProvider::new(&config.ipbase_key, config.max_retries)
            .context("failed to create GeoIP provider")?;
        sources.push(Arc::new(
            GeoIpCollector::new(Box::new(provider), &config.state_file)
                .with_lookup_timeout(config.cycle_timeout()),
        ));
    }

    serve_until_cancelled(&config, sources, token).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let Command::Serve(args) = Cli::parse().command;

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            // The logger is configured from this config, so it is not up yet.
            let _ = mne_log::init(log::LevelFilter::Error);
            error!("Invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Validated by resolve.
    let Ok(level) = mne_log::parse_level(&config.log_level) else {
        return ExitCode::FAILURE;
    };
    if mne_log::init(level).is_err() {
        return ExitCode::FAILURE;
    }
    if let Some(source) = &config.source {
        info!("Loaded config from {}", source.display());
    }

    let token = CancellationToken::new();
    let result = match cancel_on_signal(token.clone()) {
        Ok(()) => run(config, token).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
