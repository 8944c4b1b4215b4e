// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Last-known-good amounts per sub-target, persisted as a JSON object of
//! decimal-integer strings.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use log::{debug, warn};
use num_bigint::BigUint;

use crate::errors::CacheError;

pub type Amounts = BTreeMap<String, BigUint>;

/// Replace `path` with `data` without ever exposing a partial file: write a
/// sibling temp file, flush it to disk, then rename over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err)
}

/// Strict decimal-integer check: digits only, no sign, no separators.
pub fn parse_amount(value: &str) -> Option<BigUint> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Load a snapshot. A missing file is an empty snapshot; a file with any
/// invalid entry is rejected as a whole.
pub fn read_snapshot(path: &Path) -> Result<Amounts, CacheError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Amounts::new()),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let raw: BTreeMap<String, String> =
        serde_json::from_slice(&data).map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    raw.into_iter()
        .map(|(key, value)| match parse_amount(&value) {
            Some(amount) => Ok((key, amount)),
            None => Err(CacheError::InvalidAmount { key, value }),
        })
        .collect()
}

pub fn write_snapshot(path: &Path, amounts: &Amounts) -> Result<(), CacheError> {
    let raw: BTreeMap<&str, String> = amounts
        .iter()
        .map(|(key, amount)| (key.as_str(), amount.to_string()))
        .collect();
    let data = serde_json::to_vec_pretty(&raw).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &data)
}

/// In-memory view of a cache file, seeded from disk at construction.
pub struct AmountCache {
    path: PathBuf,
    entries: RwLock<Amounts>,
}

impl AmountCache {
    /// Open the cache at `path`. Unreadable or corrupt files are logged and
    /// treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_snapshot(&path) {
            Ok(entries) => {
                debug!(
                    "Loaded {} cached amounts from {}",
                    entries.len(),
                    path.display()
                );
                entries
            }
            Err(e) => {
                warn!("Failed to load cache, starting empty: {e}");
                Amounts::new()
            }
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge fresh amounts. Returns whether any entry was added or changed.
    pub fn merge(&self, updates: HashMap<String, BigUint>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for (key, amount) in updates {
            if entries.get(&key) != Some(&amount) {
                entries.insert(key, amount);
                changed = true;
            }
        }
        changed
    }

    /// Drop entries whose key fails `keep`. Returns whether any was removed.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| keep(key));
        entries.len() != before
    }

    pub fn persist(&self) -> Result<(), CacheError> {
        let snapshot = self.snapshot();
        write_snapshot(&self.path, &snapshot)
    }

    pub fn snapshot(&self) -> Amounts {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total(&self) -> BigUint {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}
