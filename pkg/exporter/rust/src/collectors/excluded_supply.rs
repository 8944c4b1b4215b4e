// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Token supply to exclude from the total supply to obtain the circulating
//! supply: the summed balances of the addresses listed by a feed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};
use num_bigint::BigUint;
use prometheus::Opts;

use crate::cache::parse_amount;
use crate::collectors::aggregate::{Aggregate, Cycle};
use crate::collectors::util::{MetricSet, NAMESPACE, amount_value, up_value};
use crate::compose::{CollectorFactory, MetricSource, Metrics};
use crate::errors::AmountError;
use crate::fanout::FanOut;
use crate::feed::AddressFeed;
use crate::query::QueryClient;

pub const NAME: &str = "excluded_supply";

pub struct ExcludedSupplyCollector {
    client: Arc<dyn QueryClient>,
    feed: Arc<dyn AddressFeed>,
    denom: String,
    aggregate: Aggregate,
}

impl ExcludedSupplyCollector {
    pub fn new(
        client: Arc<dyn QueryClient>,
        feed: Arc<dyn AddressFeed>,
        denom: &str,
        cache_dir: &Path,
        fanout: FanOut,
    ) -> Self {
        Self {
            client,
            feed,
            denom: denom.to_string(),
            aggregate: Aggregate::new(
                cache_dir.join(format!("excluded_supply_{denom}.json")),
                fanout,
            ),
        }
    }

    pub fn factory(
        feed: Arc<dyn AddressFeed>,
        denom: &str,
        cache_dir: &Path,
        fanout: FanOut,
    ) -> CollectorFactory {
        let denom = denom.to_string();
        let cache_dir = cache_dir.to_path_buf();
        Arc::new(move |client: Arc<dyn QueryClient>| {
            Ok(Arc::new(ExcludedSupplyCollector::new(
                client,
                Arc::clone(&feed),
                &denom,
                &cache_dir,
                fanout,
            )) as Arc<dyn MetricSource>)
        })
    }

    /// Run one aggregation cycle. Returns false when the address list could
    /// not be fetched in time.
    async fn refresh(&self, cycle: &Cycle<'_>) -> bool {
        let addresses = match cycle.bound(self.feed.addresses()).await {
            Some(Ok(addresses)) => addresses,
            Some(Err(e)) => {
                error!("Failed to fetch addresses: {e}");
                return false;
            }
            None => {
                error!("Fetching addresses did not finish within {:?}", cycle.budget());
                return false;
            }
        };

        if addresses.is_empty() {
            warn!("Address feed listed no addresses, keeping cached balances");
            return true;
        }
        let listed: HashSet<String> = addresses.iter().cloned().collect();

        let client = Arc::clone(&self.client);
        let denom = self.denom.clone();
        let outcome = self
            .aggregate
            .query(cycle, "Balance", addresses, move |address| {
                let client = Arc::clone(&client);
                let denom = denom.clone();
                async move {
                    let balance = client.balance(&address, &denom).await?;
                    if balance.denom != denom {
                        return Err(AmountError::Denom {
                            expected: denom,
                            got: balance.denom,
                        });
                    }
                    parse_amount(&balance.amount).ok_or(AmountError::Amount(balance.amount))
                }
            })
            .await;

        self.aggregate.apply(&listed, outcome.values);
        true
    }

    fn metrics(&self, up: bool) -> Metrics {
        let balances = self.aggregate.snapshot();
        let total: BigUint = balances.values().sum();
        let amount = total.to_string();

        let mut set = MetricSet::new();
        set.labeled_gauge(
            Opts::new(
                "excluded_supply",
                "Token supply to exclude from total supply to obtain circulating supply.",
            )
            .namespace(NAMESPACE)
            .subsystem("tokenomics")
            .const_label("source", "grpc"),
            &[("excluded_supply", amount.as_str()), ("denom", self.denom.as_str())],
            amount_value(&total),
        );

        if !balances.is_empty() {
            let series: Vec<(Vec<&str>, f64)> = balances
                .iter()
                .map(|(address, balance)| {
                    (vec![address.as_str(), self.denom.as_str()], amount_value(balance))
                })
                .collect();
            set.gauge_series(
                Opts::new("excluded_balance", "Last known balance of an excluded address.")
                    .namespace(NAMESPACE)
                    .subsystem("tokenomics"),
                &["address", "denom"],
                &series,
            );
        }

        set.gauge(
            Opts::new("balance_grpc_up", "Whether the gRPC queries succeeded.")
                .namespace(NAMESPACE)
                .subsystem("tokenomics")
                .const_label("source", "grpc")
                .const_label("query", "Balance"),
            up_value(up),
        );
        set.counter(
            Opts::new(
                "excluded_supply_address_failures_total",
                "Total per-address gRPC failures since process start.",
            )
            .namespace(NAMESPACE)
            .subsystem("tokenomics")
            .const_label("source", "grpc")
            .const_label("denom", self.denom.as_str()),
            self.aggregate.failures_total() as f64,
        );
        set.into_metrics()
    }
}

#[async_trait]
impl MetricSource for ExcludedSupplyCollector {
    fn name(&self) -> &str {
        NAME
    }

    async fn collect(&self) -> Metrics {
        let up = match self.aggregate.begin_cycle().await {
            Some(cycle) => self.refresh(&cycle).await,
            None => false,
        };
        self.metrics(up)
    }

    fn stale(&self) -> Metrics {
        self.metrics(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::{Amounts, read_snapshot, write_snapshot};
    use crate::collectors::util::testing::{render, sample};
    use crate::errors::{FeedError, QueryError};
    use crate::query::{Coin, DecCoin, StatusResponse, Validator};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Feed(Option<Vec<&'static str>>);

    #[async_trait]
    impl AddressFeed for Feed {
        async fn addresses(&self) -> Result<Vec<String>, FeedError> {
            match &self.0 {
                Some(addresses) => Ok(addresses.iter().map(|a| a.to_string()).collect()),
                None => Err(FeedError::Status {
                    url: "http://feed".to_string(),
                    status: 503,
                }),
            }
        }
    }

    struct Bank(HashMap<&'static str, Coin>);

    #[async_trait]
    impl QueryClient for Bank {
        async fn node_status(&self) -> Result<StatusResponse, QueryError> {
            Ok(StatusResponse::default())
        }

        async fn validators(&self) -> Result<Vec<Validator>, QueryError> {
            Ok(Vec::new())
        }

        async fn validator_outstanding_rewards(&self, _: &str) -> Result<Vec<DecCoin>, QueryError> {
            Ok(Vec::new())
        }

        async fn balance(&self, address: &str, _denom: &str) -> Result<Coin, QueryError> {
            self.0
                .get(address)
                .cloned()
                .ok_or_else(|| QueryError::Rpc(tonic::Status::unavailable("try again")))
        }
    }

    fn umfx(amount: &str) -> Coin {
        Coin {
            denom: "umfx".to_string(),
            amount: amount.to_string(),
        }
    }

    fn collector(bank: Bank, feed: Feed, dir: &Path) -> ExcludedSupplyCollector {
        ExcludedSupplyCollector::new(
            Arc::new(bank),
            Arc::new(feed),
            "umfx",
            dir,
            FanOut::new(8, Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_sums_balances() {
        let dir = tempfile::tempdir().unwrap();
        let bank = Bank(HashMap::from([
            ("manifest1a", umfx("100")),
            ("manifest1b", umfx("18446744073709551616")),
            (
                "manifest1c",
                Coin {
                    denom: "uother".to_string(),
                    amount: "5".to_string(),
                },
            ),
            ("manifest1d", umfx("not-a-number")),
        ]));
        let excluded = collector(
            bank,
            Feed(Some(vec!["manifest1a", "manifest1b", "manifest1c", "manifest1d"])),
            dir.path(),
        );

        let text = render(excluded.collect().await);
        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_supply",
                &[("excluded_supply", "18446744073709551716"), ("denom", "umfx")]
            ),
            Some(18446744073709551716.0)
        );
        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_balance",
                &[("address", "manifest1a")]
            ),
            Some(100.0)
        );
        assert_eq!(sample(&text, "manifest_tokenomics_balance_grpc_up", &[]), Some(1.0));
        assert_eq!(
            sample(&text, "manifest_tokenomics_excluded_supply_address_failures_total", &[]),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_feed_failure_serves_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut seeded = Amounts::new();
        seeded.insert("manifest1a".to_string(), BigUint::from(100u32));
        seeded.insert("manifest1b".to_string(), BigUint::from(50u32));
        write_snapshot(&dir.path().join("excluded_supply_umfx.json"), &seeded).unwrap();

        let excluded = collector(Bank(HashMap::new()), Feed(None), dir.path());
        let text = render(excluded.collect().await);

        assert_eq!(sample(&text, "manifest_tokenomics_balance_grpc_up", &[]), Some(0.0));
        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_supply",
                &[("excluded_supply", "150")]
            ),
            Some(150.0)
        );
        assert_eq!(
            sample(&text, "manifest_tokenomics_excluded_supply_address_failures_total", &[]),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_delisted_addresses_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excluded_supply_umfx.json");
        let mut seeded = Amounts::new();
        seeded.insert("manifest1a".to_string(), BigUint::from(100u32));
        seeded.insert("manifest1old".to_string(), BigUint::from(7u32));
        write_snapshot(&path, &seeded).unwrap();

        let excluded = collector(
            Bank(HashMap::from([("manifest1a", umfx("100"))])),
            Feed(Some(vec!["manifest1a"])),
            dir.path(),
        );
        let text = render(excluded.collect().await);

        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_supply",
                &[("excluded_supply", "100")]
            ),
            Some(100.0)
        );
        let cached = read_snapshot(&path).unwrap();
        assert_eq!(cached.keys().collect::<Vec<_>>(), vec!["manifest1a"]);
    }

    #[tokio::test]
    async fn test_empty_feed_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excluded_supply_umfx.json");
        let mut seeded = Amounts::new();
        seeded.insert("manifest1a".to_string(), BigUint::from(100u32));
        seeded.insert("manifest1b".to_string(), BigUint::from(50u32));
        write_snapshot(&path, &seeded).unwrap();

        let excluded = collector(Bank(HashMap::new()), Feed(Some(Vec::new())), dir.path());
        let text = render(excluded.collect().await);

        assert_eq!(sample(&text, "manifest_tokenomics_balance_grpc_up", &[]), Some(1.0));
        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_supply",
                &[("excluded_supply", "150")]
            ),
            Some(150.0)
        );
        assert_eq!(read_snapshot(&path).unwrap(), seeded);
    }

    #[tokio::test]
    async fn test_duplicate_addresses_count_once() {
        let dir = tempfile::tempdir().unwrap();
        let excluded = collector(
            Bank(HashMap::from([("manifest1a", umfx("100"))])),
            Feed(Some(vec!["manifest1a", "manifest1a", "manifest1x", "manifest1x"])),
            dir.path(),
        );
        let text = render(excluded.collect().await);

        assert_eq!(
            sample(
                &text,
                "manifest_tokenomics_excluded_supply",
                &[("excluded_supply", "100")]
            ),
            Some(100.0)
        );
        assert_eq!(
            sample(&text, "manifest_tokenomics_excluded_supply_address_failures_total", &[]),
            Some(1.0)
        );
    }
}
