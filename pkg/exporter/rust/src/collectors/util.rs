// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::error;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use prometheus::{Counter, Gauge, GaugeVec, Opts};

use crate::compose::Metrics;

pub const NAMESPACE: &str = "manifest";

/// Gauge value of an exact amount. The label carrying the amount is the
/// source of truth; this is best effort, `-1` when not a finite `f64`.
pub fn amount_value(amount: &BigUint) -> f64 {
    match amount.to_f64() {
        Some(value) if value.is_finite() => value,
        _ => -1.0,
    }
}

pub fn up_value(up: bool) -> f64 {
    if up { 1.0 } else { 0.0 }
}

/// Accumulates freshly built metrics for one collection. Construction errors
/// are logged and the metric is left out.
#[derive(Default)]
pub struct MetricSet {
    metrics: Metrics,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauge(&mut self, opts: Opts, value: f64) {
        let name = opts.fq_name();
        match Gauge::with_opts(opts) {
            Ok(gauge) => {
                gauge.set(value);
                self.metrics.push(Box::new(gauge));
            }
            Err(e) => error!("Failed to create metric {name}: {e}"),
        }
    }

    pub fn labeled_gauge(&mut self, opts: Opts, labels: &[(&str, &str)], value: f64) {
        let name = opts.fq_name();
        let names: Vec<&str> = labels.iter().map(|(label, _)| *label).collect();
        let values: Vec<&str> = labels.iter().map(|(_, value)| *value).collect();

        match GaugeVec::new(opts, &names) {
            Ok(vec) => match vec.get_metric_with_label_values(values.as_slice()) {
                Ok(gauge) => {
                    gauge.set(value);
                    self.metrics.push(Box::new(vec));
                }
                Err(e) => error!("Failed to create metric {name}: {e}"),
            },
            Err(e) => error!("Failed to create metric {name}: {e}"),
        }
    }

    /// Gauge family with one series per label set.
    pub fn gauge_series(&mut self, opts: Opts, label_names: &[&str], series: &[(Vec<&str>, f64)]) {
        let name = opts.fq_name();
        let vec = match GaugeVec::new(opts, label_names) {
            Ok(vec) => vec,
            Err(e) => {
                error!("Failed to create metric {name}: {e}");
                return;
            }
        };

        for (values, value) in series {
            match vec.get_metric_with_label_values(values.as_slice()) {
                Ok(gauge) => gauge.set(*value),
                Err(e) => error!("Failed to create series of {name}: {e}"),
            }
        }
        self.metrics.push(Box::new(vec));
    }

    pub fn counter(&mut self, opts: Opts, value: f64) {
        let name = opts.fq_name();
        match Counter::with_opts(opts) {
            Ok(counter) => {
                counter.inc_by(value);
                self.metrics.push(Box::new(counter));
            }
            Err(e) => error!("Failed to create metric {name}: {e}"),
        }
    }

    pub fn into_metrics(self) -> Metrics {
        self.metrics
    }
}
