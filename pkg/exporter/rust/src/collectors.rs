// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub mod aggregate;
pub mod excluded_supply;
pub mod fees;
pub mod geoip;
pub mod util;

use std::path::PathBuf;

pub const DEFAULT_DENOM: &str = "umfx";

/// Per-user cache directory of the exporter, `$XDG_CACHE_HOME` or
/// `$HOME/.cache`, falling back to the working directory.
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|home| !home.is_empty())
                .map(|home| PathBuf::from(home).join(".cache"))
        })
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("manifest-node-exporter")
}
