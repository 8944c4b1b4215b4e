// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Bounded concurrent calls, one per sub-target.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);
/// Budget of one whole collection cycle, kept below the default scrape
/// timeout.
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug)]
pub struct Outcome<V> {
    /// Successful results keyed by sub-target.
    pub values: HashMap<String, V>,
    /// Sub-targets whose call failed, timed out, panicked or was still
    /// running at the cycle deadline.
    pub failures: u64,
}

enum Call<V, E> {
    Done(V),
    Failed(E),
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    max_concurrency: usize,
    call_timeout: Duration,
    cycle_timeout: Duration,
}

impl FanOut {
    pub fn new(max_concurrency: usize, call_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            call_timeout,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
        }
    }

    pub fn with_cycle_timeout(mut self, cycle_timeout: Duration) -> Self {
        self.cycle_timeout = cycle_timeout;
        self
    }

    pub fn cycle_timeout(&self) -> Duration {
        self.cycle_timeout
    }

    /// Run `call` once per distinct key, at most `max_concurrency` at a
    /// time, each bounded by the call timeout. Returns once every call has
    /// finished or timed out, or at `deadline` with the results gathered so
    /// far. Dropping the returned future aborts the calls in flight.
    pub async fn run<V, E, F, Fut>(
        &self,
        operation: &str,
        keys: Vec<String>,
        deadline: Instant,
        call: F,
    ) -> Outcome<V>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: Display + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key.clone()) {
                debug!("Skipping duplicate {operation} target {key}");
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.call_timeout;
            let future = call(key.clone());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let call = match tokio::time::timeout(timeout, future).await {
                    Ok(Ok(value)) => Call::Done(value),
                    Ok(Err(e)) => Call::Failed(e),
                    Err(_) => Call::TimedOut,
                };
                (key, call)
            });
        }

        let mut outcome = Outcome {
            values: HashMap::new(),
            failures: 0,
        };

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    Some(joined) => joined,
                    None => break,
                },
                _ = &mut expired => {
                    let unfinished = tasks.len() as u64;
                    error!("Query {operation} reached the cycle deadline with {unfinished} calls unfinished");
                    outcome.failures += unfinished;
                    tasks.abort_all();
                    break;
                }
            };

            match joined {
                Ok((key, Call::Done(value))) => {
                    outcome.values.insert(key, value);
                }
                Ok((key, Call::Failed(e))) => {
                    error!("Failed to query {operation} for {key}: {e}");
                    outcome.failures += 1;
                }
                Ok((key, Call::TimedOut)) => {
                    error!(
                        "Query {operation} for {key} timed out after {:?}",
                        self.call_timeout
                    );
                    outcome.failures += 1;
                }
                Err(e) => {
                    error!("Query task for {operation} failed: {e}");
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY, DEFAULT_CALL_TIMEOUT)
    }
}
