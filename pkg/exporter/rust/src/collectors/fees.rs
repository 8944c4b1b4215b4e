// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Transaction fees locked in validators, summed over every validator's
//! outstanding rewards.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use prometheus::Opts;

use crate::cache::parse_amount;
use crate::collectors::aggregate::{Aggregate, Cycle};
use crate::collectors::util::{MetricSet, NAMESPACE, amount_value, up_value};
use crate::compose::{CollectorFactory, MetricSource, Metrics};
use crate::errors::AmountError;
use crate::fanout::FanOut;
use crate::query::{DecCoin, QueryClient};

pub const NAME: &str = "fees";

/// Rewards are decimal coins with this many fractional digits, sent as the
/// scaled integer.
const DEC_PRECISION: u32 = 18;

/// Whole base units of a reward and the fractional part dropped from it.
#[derive(Debug, Default, PartialEq)]
struct Reward {
    whole: BigUint,
    dropped: BigUint,
}

pub struct FeesCollector {
    client: Arc<dyn QueryClient>,
    denom: String,
    aggregate: Aggregate,
}

impl FeesCollector {
    pub fn new(client: Arc<dyn QueryClient>, denom: &str, cache_dir: &Path, fanout: FanOut) -> Self {
        Self {
            client,
            denom: denom.to_string(),
            aggregate: Aggregate::new(cache_dir.join(format!("fees_{denom}.json")), fanout),
        }
    }

    pub fn factory(denom: &str, cache_dir: &Path, fanout: FanOut) -> CollectorFactory {
        let denom = denom.to_string();
        let cache_dir = cache_dir.to_path_buf();
        Arc::new(move |client: Arc<dyn QueryClient>| {
            Ok(Arc::new(FeesCollector::new(client, &denom, &cache_dir, fanout))
                as Arc<dyn MetricSource>)
        })
    }

    /// Run one aggregation cycle. Returns false when the validator list
    /// could not be fetched in time.
    async fn refresh(&self, cycle: &Cycle<'_>) -> bool {
        let validators = match cycle.bound(self.client.validators()).await {
            Some(Ok(validators)) => validators,
            Some(Err(e)) => {
                error!("Failed to query Validators: {e}");
                return false;
            }
            None => {
                error!("Validators query did not finish within {:?}", cycle.budget());
                return false;
            }
        };

        if validators.is_empty() {
            warn!("Validators response has no validators");
            return true;
        }

        let targets: Vec<String> = validators
            .into_iter()
            .map(|validator| validator.operator_address)
            .collect();
        let listed: HashSet<String> = targets.iter().cloned().collect();

        let client = Arc::clone(&self.client);
        let denom = self.denom.clone();
        let outcome = self
            .aggregate
            .query(cycle, "ValidatorOutstandingRewards", targets, move |validator| {
                let client = Arc::clone(&client);
                let denom = denom.clone();
                async move {
                    let rewards = client.validator_outstanding_rewards(&validator).await?;
                    reward_amount(&rewards, &denom)
                }
            })
            .await;

        let mut dropped = BigUint::zero();
        let mut updates = HashMap::with_capacity(outcome.values.len());
        for (validator, reward) in outcome.values {
            dropped += reward.dropped;
            updates.insert(validator, reward.whole);
        }
        if !dropped.is_zero() {
            warn!(
                "Truncated fractional {} rewards, dropped {dropped}e-{DEC_PRECISION} {}",
                self.denom, self.denom
            );
        }

        self.aggregate.apply(&listed, updates);
        true
    }

    fn metrics(&self, up: bool) -> Metrics {
        let total = self.aggregate.total();
        let amount = total.to_string();

        let mut set = MetricSet::new();
        set.labeled_gauge(
            Opts::new("fees", "Transaction fees locked in validators.")
                .namespace(NAMESPACE)
                .subsystem("tokenomics")
                .const_label("source", "grpc"),
            &[("amount", amount.as_str()), ("denom", self.denom.as_str())],
            amount_value(&total),
        );
        set.gauge(
            Opts::new("fees_grpc_up", "Whether the gRPC query was successful.")
                .namespace(NAMESPACE)
                .subsystem("tokenomics")
                .const_label("source", "grpc")
                .const_label("queries", "Validators, ValidatorOutstandingRewards"),
            up_value(up),
        );
        set.counter(
            Opts::new(
                "fees_validator_failures_total",
                "Total per-validator gRPC failures since process start.",
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
impl MetricSource for FeesCollector {
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

/// Outstanding reward of one validator in `denom`. No rewards at all is a
/// zero amount; rewards in other denoms only are an error.
fn reward_amount(rewards: &[DecCoin], denom: &str) -> Result<Reward, AmountError> {
    if rewards.is_empty() {
        return Ok(Reward::default());
    }

    let Some(coin) = rewards.iter().find(|coin| coin.denom == denom) else {
        let got: Vec<&str> = rewards.iter().map(|coin| coin.denom.as_str()).collect();
        return Err(AmountError::Denom {
            expected: denom.to_string(),
            got: got.join(","),
        });
    };

    let raw = parse_amount(&coin.amount).ok_or_else(|| AmountError::Amount(coin.amount.clone()))?;
    let scale = BigUint::from(10u32).pow(DEC_PRECISION);
    Ok(Reward {
        whole: &raw / &scale,
        dropped: raw % scale,
    })
}
