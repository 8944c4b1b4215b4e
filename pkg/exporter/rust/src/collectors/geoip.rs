// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Geographical location of the node's public IP address. The lookup is
//! refreshed at most once a day; the last record is kept in a state file.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use prometheus::Opts;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::cache::write_atomic;
use crate::collectors::util::{MetricSet, NAMESPACE, up_value};
use crate::compose::{MetricSource, Metrics};
use crate::errors::{CacheError, FeedError};
use crate::fanout::DEFAULT_CYCLE_TIMEOUT;
use crate::feed::{CLIENT_TIMEOUT, get_json, http_client};

pub const NAME: &str = "geoip";

const IPIFY_URL: &str = "https://api.ipify.org?format=json";
const IPBASE_URL: &str = "https://api.ipbase.com/v2/info";
const REFRESH_INTERVAL: time::Duration = time::Duration::hours(24);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub ip: String,
    pub country_code: String,
    pub country_name: String,
    pub region_code: String,
    pub region_name: String,
    pub city: String,
    pub zip_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GeoState {
    record: GeoRecord,
    #[serde(with = "time::serde::rfc3339")]
    next_fetch: OffsetDateTime,
}

#[async_trait]
pub trait GeoIpProvider: Send + Sync {
    async fn lookup(&self) -> Result<GeoRecord, FeedError>;
}

#[derive(Deserialize)]
struct IpifyResponse {
    ip: String,
}

#[derive(Deserialize)]
struct IpBaseResponse {
    data: IpBaseData,
}

#[derive(Deserialize)]
struct IpBaseData {
    ip: String,
    location: IpBaseLocation,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IpBaseLocation {
    latitude: f64,
    longitude: f64,
    zip: Option<String>,
    country: Option<IpBaseArea>,
    region: Option<IpBaseArea>,
    city: Option<IpBaseArea>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IpBaseArea {
    alpha2: Option<String>,
    name: Option<String>,
}

impl IpBaseArea {
    fn code(area: &Option<Self>) -> String {
        area.as_ref()
            .and_then(|a| a.alpha2.clone())
            .unwrap_or_default()
    }

    fn name(area: &Option<Self>) -> String {
        area.as_ref()
            .and_then(|a| a.name.clone())
            .unwrap_or_default()
    }
}

impl From<IpBaseData> for GeoRecord {
    fn from(data: IpBaseData) -> Self {
        let location = data.location;
        GeoRecord {
            ip: data.ip,
            country_code: IpBaseArea::code(&location.country),
            country_name: IpBaseArea::name(&location.country),
            region_code: IpBaseArea::code(&location.region),
            region_name: IpBaseArea::name(&location.region),
            city: IpBaseArea::name(&location.city),
            zip_code: location.zip.unwrap_or_default(),
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// Public IP from ipify, location from ipbase.
pub struct IpBaseProvider {
    client: reqwest::Client,
    ipbase: reqwest::Client,
    ipify_url: String,
    ipbase_url: String,
    max_retries: u32,
}

impl IpBaseProvider {
    pub fn new(api_key: &str, max_retries: u32) -> Result<Self, FeedError> {
        Self::with_endpoints(api_key, max_retries, IPIFY_URL, IPBASE_URL)
    }

    pub fn with_endpoints(
        api_key: &str,
        max_retries: u32,
        ipify_url: &str,
        ipbase_url: &str,
    ) -> Result<Self, FeedError> {
        let mut key = HeaderValue::from_str(api_key).map_err(|e| FeedError::Decode {
            url: ipbase_url.to_string(),
            reason: format!("invalid API key: {e}"),
        })?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);

        let client =
            http_client(CLIENT_TIMEOUT, HeaderMap::new()).map_err(|source| FeedError::Http {
                url: ipify_url.to_string(),
                source,
            })?;
        let ipbase = http_client(CLIENT_TIMEOUT, headers).map_err(|source| FeedError::Http {
            url: ipbase_url.to_string(),
            source,
        })?;

        Ok(Self {
            client,
            ipbase,
            ipify_url: ipify_url.to_string(),
            ipbase_url: ipbase_url.to_string(),
            max_retries,
        })
    }
}

#[async_trait]
impl GeoIpProvider for IpBaseProvider {
    async fn lookup(&self) -> Result<GeoRecord, FeedError> {
        let IpifyResponse { ip } = get_json(&self.client, &self.ipify_url, self.max_retries).await?;
        let ip: IpAddr = ip.parse().map_err(|_| FeedError::Decode {
            url: self.ipify_url.clone(),
            reason: format!("invalid IP address: {ip}"),
        })?;

        let url = format!("{}?ip={ip}", self.ipbase_url);
        let response: IpBaseResponse = get_json(&self.ipbase, &url, self.max_retries).await?;
        Ok(response.data.into())
    }
}

fn load_state(path: &Path) -> Option<GeoState> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read GeoIP state {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Ignoring corrupt GeoIP state {}: {e}", path.display());
            None
        }
    }
}

fn save_state(path: &Path, state: &GeoState) -> Result<(), CacheError> {
    let data = serde_json::to_vec_pretty(state).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &data)
}

pub struct GeoIpCollector {
    provider: Box<dyn GeoIpProvider>,
    state_file: PathBuf,
    state: std::sync::Mutex<Option<GeoState>>,
    lookup: Mutex<()>,
    lookup_timeout: Duration,
}

impl GeoIpCollector {
    pub fn new(provider: Box<dyn GeoIpProvider>, state_file: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        let state = load_state(&state_file);
        if let Some(state) = &state {
            info!(
                "Loaded GeoIP state for {}, next refresh at {}",
                state.record.ip, state.next_fetch
            );
        }

        Self {
            provider,
            state_file,
            state: std::sync::Mutex::new(state),
            lookup: Mutex::new(()),
            lookup_timeout: DEFAULT_CYCLE_TIMEOUT,
        }
    }

    /// Bound on a whole lookup, retries included; expiry counts as a failed
    /// lookup.
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    fn next_fetch(&self) -> Option<OffsetDateTime> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|current| current.next_fetch)
    }

    async fn refresh(&self, now: OffsetDateTime) -> bool {
        let _serial = self.lookup.lock().await;

        if let Some(next_fetch) = self.next_fetch().filter(|next_fetch| now < *next_fetch) {
            debug!("Serving cached GeoIP record until {next_fetch}");
            return true;
        }

        match self.provider.lookup().await {
            Ok(record) => {
                let fresh = GeoState {
                    record,
                    next_fetch: now + REFRESH_INTERVAL,
                };
                if let Err(e) = save_state(&self.state_file, &fresh) {
                    warn!("Failed to persist GeoIP state: {e}");
                }
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
                true
            }
            Err(e) => {
                error!("GeoIP lookup failed: {e}");
                false
            }
        }
    }

    async fn collect_at(&self, now: OffsetDateTime) -> Metrics {
        let up = match tokio::time::timeout(self.lookup_timeout, self.refresh(now)).await {
            Ok(up) => up,
            Err(_) => {
                error!("GeoIP lookup did not finish within {:?}", self.lookup_timeout);
                false
            }
        };
        self.metrics(up)
    }

    fn metrics(&self, up: bool) -> Metrics {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        metrics(state.as_ref().map(|s| &s.record), up)
    }
}

#[async_trait]
impl MetricSource for GeoIpCollector {
    fn name(&self) -> &str {
        NAME
    }

    async fn collect(&self) -> Metrics {
        self.collect_at(OffsetDateTime::now_utc()).await
    }

    fn stale(&self) -> Metrics {
        self.metrics(false)
    }
}

fn geo_opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem("geo")
        .const_label("source", "geoip")
}

fn metrics(record: Option<&GeoRecord>, up: bool) -> Metrics {
    let mut set = MetricSet::new();

    if let Some(record) = record {
        let ip = record.ip.as_str();
        set.labeled_gauge(
            geo_opts("latitude", "Node's geographical latitude."),
            &[("ip", ip)],
            record.latitude,
        );
        set.labeled_gauge(
            geo_opts("longitude", "Node's geographical longitude."),
            &[("ip", ip)],
            record.longitude,
        );
        set.labeled_gauge(
            geo_opts("metadata", "Node's geographical information."),
            &[
                ("ip", ip),
                ("country_code", record.country_code.as_str()),
                ("country_name", record.country_name.as_str()),
                ("region_code", record.region_code.as_str()),
                ("region_name", record.region_name.as_str()),
                ("city", record.city.as_str()),
                ("zip_code", record.zip_code.as_str()),
            ],
            1.0,
        );
    }

    set.gauge(
        geo_opts("up", "Whether the last GeoIP lookup succeeded."),
        up_value(up),
    );
    set.into_metrics()
}
