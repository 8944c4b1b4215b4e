// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod cache;
pub mod cli;
pub mod collectors;
pub mod compose;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod errors;
pub mod fanout;
pub mod feed;
pub mod monitor;
pub mod probe;
pub mod query;
pub mod registry;
pub mod server;

pub use compose::{CollectorFactory, MetricSource, compose_from_connection};
pub use discovery::{ListenEndpoint, ProcessDescriptor, ProcessTable, detect};
pub use monitor::{Monitor, setup_monitors};
pub use registry::Registry;
pub use server::MetricsServer;
