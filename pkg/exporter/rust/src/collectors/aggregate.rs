// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Cycle shared by the aggregating collectors: fan out over the targets,
//! fold the results into the cache, persist when something changed.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use num_bigint::BigUint;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::cache::{AmountCache, Amounts};
use crate::fanout::{FanOut, Outcome};

/// One running collection cycle. Holds the cycle lock and the deadline
/// every step of the cycle must meet.
pub struct Cycle<'a> {
    _serial: MutexGuard<'a, ()>,
    deadline: Instant,
    budget: Duration,
}

impl Cycle<'_> {
    /// Run `future` until the cycle deadline; `None` when it expired first.
    pub async fn bound<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::time::timeout_at(self.deadline, future).await.ok()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

pub struct Aggregate {
    cache: AmountCache,
    fanout: FanOut,
    failures_total: AtomicU64,
    cycle: Mutex<()>,
}

impl Aggregate {
    pub fn new(cache_path: impl Into<PathBuf>, fanout: FanOut) -> Self {
        Self {
            cache: AmountCache::load(cache_path),
            fanout,
            failures_total: AtomicU64::new(0),
            cycle: Mutex::new(()),
        }
    }

    /// Start a cycle with the fan-out's cycle budget. Cycles are serialized
    /// so overlapping scrapes never interleave their cache updates; `None`
    /// when the previous cycle still runs at the deadline.
    pub async fn begin_cycle(&self) -> Option<Cycle<'_>> {
        let budget = self.fanout.cycle_timeout();
        let deadline = Instant::now() + budget;
        match tokio::time::timeout_at(deadline, self.cycle.lock()).await {
            Ok(serial) => Some(Cycle {
                _serial: serial,
                deadline,
                budget,
            }),
            Err(_) => {
                warn!("Previous collection cycle still running after {budget:?}, serving cached values");
                None
            }
        }
    }

    /// Query every target concurrently until the cycle deadline. Failed
    /// targets are added to the running failure counter.
    pub async fn query<V, E, F, Fut>(
        &self,
        cycle: &Cycle<'_>,
        operation: &str,
        targets: Vec<String>,
        call: F,
    ) -> Outcome<V>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: Display + Send + 'static,
    {
        let outcome = self
            .fanout
            .run(operation, targets, cycle.deadline, call)
            .await;
        if outcome.failures > 0 {
            self.failures_total
                .fetch_add(outcome.failures, Ordering::Relaxed);
        }
        outcome
    }

    /// Fold a cycle's results into the cache. Entries for keys outside
    /// `targets` are dropped; the file is rewritten only on change.
    pub fn apply(&self, targets: &HashSet<String>, updates: HashMap<String, BigUint>) {
        let pruned = self.cache.retain(|key| targets.contains(key));
        let changed = self.cache.merge(updates);

        if !(changed || pruned) {
            debug!("Cache {} unchanged", self.cache.path().display());
            return;
        }

        if let Err(e) = self.cache.persist() {
            warn!("Failed to persist cache: {e}");
        }
    }

    pub fn total(&self) -> BigUint {
        self.cache.total()
    }

    pub fn snapshot(&self) -> Amounts {
        self.cache.snapshot()
    }

    pub fn failures_total(&self) -> u64 {
        self.failures_total.load(Ordering::Relaxed)
    }
}
