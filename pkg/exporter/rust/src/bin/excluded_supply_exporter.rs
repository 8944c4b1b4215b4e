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

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use mne_exporter::cli::{ServeArgs, cancel_on_signal, serve_until_cancelled};
use mne_exporter::collectors::DEFAULT_DENOM;
use mne_exporter::collectors::excluded_supply::{self, ExcludedSupplyCollector};
use mne_exporter::config::ServeConfig;
use mne_exporter::connection::TlsPolicy;
use mne_exporter::discovery::procfs::ProcFs;
use mne_exporter::errors::ConfigError;
use mne_exporter::fanout::FanOut;
use mne_exporter::feed::HttpAddressFeed;
use mne_exporter::monitor::manifestd::{self, ManifestdMonitor};
use mne_exporter::probe::GrpcProbe;
use mne_exporter::{CollectorFactory, Monitor, Registry, setup_monitors};

const APP_NAME: &str = "manifest-excluded-supply-exporter";

#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Prometheus exporter for the supply excluded from circulation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the node and serve the excluded supply
    Serve(ExcludedServeArgs),
}

#[derive(Args, Debug)]
struct ExcludedServeArgs {
    #[command(flatten)]
    serve: ServeArgs,

    /// URL returning the JSON list of excluded addresses; required here or
    /// as `addrs_endpoint` in the config file
    #[arg(long, env = "MNE_ADDRS_ENDPOINT")]
    addrs_endpoint: Option<String>,
}

impl ExcludedServeArgs {
    fn resolve(&self) -> Result<ServeConfig> {
        let mut config = self.serve.resolve(APP_NAME)?;
        if let Some(endpoint) = &self.addrs_endpoint {
            config.addrs_endpoint = endpoint.clone();
        }
        if config.addrs_endpoint.trim().is_empty() {
            return Err(ConfigError::Empty("addrs-endpoint").into());
        }
        Ok(config)
    }
}

async fn run(config: ServeConfig, token: CancellationToken) -> Result<()> {
    let tls = TlsPolicy::from_tls_flag(config.tls);
    let fanout = FanOut::new(config.max_concurrency, config.rpc_timeout)
        .with_cycle_timeout(config.cycle_timeout());

    let feed = HttpAddressFeed::new(&config.addrs_endpoint, config.max_retries)
        .context("failed to create address feed client")?;

    let factories: Registry<CollectorFactory> = Registry::new("collector factory");
    factories.register(
        excluded_supply::NAME,
        ExcludedSupplyCollector::factory(
            Arc::new(feed),
            DEFAULT_DENOM,
            &config.cache_dir,
            fanout,
        ),
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

    let sources = setup_monitors(&monitors).await?;
    serve_until_cancelled(&config, sources, token).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let Command::Serve(args) = Cli::parse().command;

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            let _ = mne_log::init(log::LevelFilter::Error);
            error!("Invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let Ok(level) = mne_log::parse_level(&config.log_level) else {
        return ExitCode::FAILURE;
    };
    if mne_log::init(level).is_err() {
        return ExitCode::FAILURE;
    }
    if let Some(source) = &config.source {
        info!("Loaded config from {}", source.display());
    }
    info!("Excluded addresses from {}", config.addrs_endpoint);

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
