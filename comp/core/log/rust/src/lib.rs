// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! JSON-lines logging backend for the `log` facade.
//!
//! Every record becomes a single JSON object on its own line:
//!
//! ```text
//! {"level":"INFO","msg":"listening","target":"mne_exporter::server","time":"2026-01-02T03:04:05.123Z"}
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Level names accepted by [`parse_level`], in the order they are printed.
pub const VALID_LEVELS: [&str; 4] = ["debug", "error", "info", "warn"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLevel(pub String);

impl fmt::Display for InvalidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid log level: {}. valid levels: {}",
            self.0,
            VALID_LEVELS.join("|")
        )
    }
}

impl std::error::Error for InvalidLevel {}

/// Parse a user supplied level name. Only the four operator-facing levels are
/// accepted; `trace` stays reserved for development builds.
pub fn parse_level(name: &str) -> Result<LevelFilter, InvalidLevel> {
    match name {
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" => Ok(LevelFilter::Warn),
        "error" => Ok(LevelFilter::Error),
        other => Err(InvalidLevel(other.to_string())),
    }
}

pub struct JsonLogger {
    level: LevelFilter,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl JsonLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self::with_sink(level, Box::new(io::stdout()))
    }

    pub fn with_sink(level: LevelFilter, sink: Box<dyn Write + Send>) -> Self {
        JsonLogger {
            level,
            sink: Mutex::new(sink),
        }
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_record(record, OffsetDateTime::now_utc());
        // A poisoned sink only means another thread panicked mid-write; the
        // underlying writer is still usable.
        let mut sink = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(sink, "{line}");
    }

    fn flush(&self) {
        let mut sink = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sink.flush();
    }
}

/// Render one record as a JSON object without the trailing newline.
pub fn format_record(record: &Record, now: OffsetDateTime) -> String {
    let time = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());

    let mut object = Map::new();
    object.insert("time".to_string(), Value::String(time));
    object.insert(
        "level".to_string(),
        Value::String(record.level().as_str().to_string()),
    );
    object.insert(
        "target".to_string(),
        Value::String(record.target().to_string()),
    );
    object.insert("msg".to_string(), Value::String(record.args().to_string()));

    Value::Object(object).to_string()
}

/// Install the JSON logger as the global `log` backend.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(JsonLogger::new(level)))?;
    log::set_max_level(level);
    Ok(())
}
