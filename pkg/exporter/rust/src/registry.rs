// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Thread-safe keyed store shared by the monitor and collector factory
//! registries.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::debug;

/// Keyed store guarded by a read/write lock.
///
/// Writers overwrite silently (last writer wins). Readers get clones, so a
/// snapshot taken with [`Registry::get_all`] stays valid while the registry
/// keeps changing.
pub struct Registry<T: Clone> {
    kind: &'static str,
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(key.clone(), value).is_some() {
            debug!("Overwriting registered {} {}", self.kind, key);
        } else {
            debug!("Registered {} {}", self.kind, key);
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Point-in-time copy of every entry. Order is unspecified.
    pub fn get_all(&self) -> Vec<(String, T)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_get_missing_key() {
        let registry: Registry<u32> = Registry::new("thing");
        assert_eq!(registry.get("nope"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_overwrites() {
        let registry = Registry::new("thing");
        registry.register("a", 1);
        registry.register("a", 2);
        assert_eq!(registry.get("a"), Some(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_all_is_a_snapshot() {
        let registry = Registry::new("thing");
        registry.register("a", 1);
        registry.register("b", 2);

        let snapshot = registry.get_all();
        registry.register("c", 3);
        registry.register("a", 10);

        let mut snapshot = snapshot;
        snapshot.sort();
        assert_eq!(
            snapshot,
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_register_and_read() {
        let registry = Arc::new(Registry::new("thing"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for j in 0..100 {
                        registry.register(format!("{i}-{j}"), j);
                        let _ = registry.get_all();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 800);
    }
}
