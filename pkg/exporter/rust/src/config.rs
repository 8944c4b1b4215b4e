// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::collectors::default_cache_dir;
use crate::errors::ConfigError;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:2112";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_STATE_FILE: &str = "./state.json";

/// Settings of the `serve` command. Built from defaults, then a YAML config
/// file, then environment and command line (see [`crate::cli`]).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub listen_address: String,
    /// Dial the node over TLS validated against the system roots instead of
    /// plaintext.
    pub tls: bool,
    pub max_concurrency: usize,
    pub max_retries: u32,
    #[serde(deserialize_with = "seconds")]
    pub probe_timeout: Duration,
    #[serde(deserialize_with = "seconds")]
    pub rpc_timeout: Duration,
    #[serde(deserialize_with = "seconds")]
    pub scrape_timeout: Duration,
    #[serde(deserialize_with = "seconds")]
    pub shutdown_timeout: Duration,
    pub cache_dir: PathBuf,
    pub addrs_endpoint: String,
    pub ipbase_key: String,
    pub state_file: PathBuf,
    pub log_level: String,

    /// Config file the settings were read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            tls: false,
            max_concurrency: crate::fanout::DEFAULT_MAX_CONCURRENCY,
            max_retries: crate::feed::DEFAULT_MAX_RETRIES,
            probe_timeout: crate::probe::DEFAULT_PROBE_TIMEOUT,
            rpc_timeout: crate::fanout::DEFAULT_CALL_TIMEOUT,
            scrape_timeout: crate::server::DEFAULT_SCRAPE_TIMEOUT,
            shutdown_timeout: crate::server::DEFAULT_SHUTDOWN_TIMEOUT,
            cache_dir: default_cache_dir(),
            addrs_endpoint: String::new(),
            ipbase_key: String::new(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            source: None,
        }
    }
}

/// Split `host:port`, with IPv6 hosts in brackets.
fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once("]:");
    }
    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

fn validate_listen_address(address: &str) -> Result<(), ConfigError> {
    let (host, port) = split_host_port(address)
        .ok_or_else(|| ConfigError::ListenAddressFormat(address.to_string()))?;

    port.parse::<u16>()
        .map_err(|_| ConfigError::ListenPort(port.to_string()))?;

    if !(host.is_empty()
        || host == "0.0.0.0"
        || host == "localhost"
        || host.parse::<IpAddr>().is_ok())
    {
        return Err(ConfigError::ListenHost(host.to_string()));
    }

    Ok(())
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::NotPositive("max-concurrency"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::NotPositive("max-retries"));
        }

        for (name, timeout) in [
            ("probe-timeout", self.probe_timeout),
            ("rpc-timeout", self.rpc_timeout),
            ("scrape-timeout", self.scrape_timeout),
            ("shutdown-timeout", self.shutdown_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::NotPositive(name));
            }
        }

        validate_listen_address(&self.listen_address)?;
        mne_log::parse_level(&self.log_level)?;
        Ok(())
    }

    /// Budget of one collection cycle: four fifths of the scrape timeout.
    pub fn cycle_timeout(&self) -> Duration {
        self.scrape_timeout * 4 / 5
    }

    /// Address to bind; an empty host listens on every interface.
    pub fn bind_address(&self) -> String {
        match split_host_port(&self.listen_address) {
            Some(("", port)) => format!("0.0.0.0:{port}"),
            Some((host, port)) if host.contains(':') => format!("[{host}]:{port}"),
            _ => self.listen_address.clone(),
        }
    }
}

/// Config file locations searched when none is given explicitly.
pub fn search_paths(app_name: &str) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config.yaml")];
    if let Some(home) = std::env::var_os("HOME").filter(|home| !home.is_empty()) {
        paths.push(
            PathBuf::from(home)
                .join(format!(".{app_name}"))
                .join("config.yaml"),
        );
    }
    paths.push(Path::new("/etc").join(app_name).join("config.yaml"));
    paths
}

fn read_file(path: &Path) -> Result<ServeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = if contents.trim().is_empty() {
        ServeConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.source = Some(path.to_path_buf());
    Ok(config)
}

/// Load the config file: `explicit` when given (it must exist), otherwise
/// the first of `candidates` that exists, otherwise defaults.
pub fn load_config(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<ServeConfig, ConfigError> {
    if let Some(path) = explicit {
        return read_file(path);
    }

    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => read_file(path),
        None => Ok(ServeConfig::default()),
    }
}
