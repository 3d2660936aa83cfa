//! Logging infrastructure for rumormesh
//!
//! Two separate concerns live here:
//! - process diagnostics through `tracing`, configured with [`init_logging`]
//! - the per-session log sink a coordinator writes protocol events to, one
//!   [`SessionLog`] file per `start`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;
use tracing_subscriber::{
    filter::{EnvFilter, ParseError},
    fmt::time::UtcTime,
    layer::SubscriberExt,
    Layer, Registry,
};
use uuid::Uuid;

use crate::error::RumorError;

/// Correlation ID identifying one coordinator session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a short string representation for logging
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostics output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level filter
    pub level: String,
    /// One JSON object per event instead of human-readable lines
    pub json: bool,
    /// Include file and line numbers
    pub include_location: bool,
    /// Per-target level overrides, e.g. `rumormesh::transport` -> `debug`
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_location: false,
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Filter combining the default level and the target overrides
    pub fn filter(&self) -> Result<EnvFilter, ParseError> {
        self.targets
            .iter()
            .try_fold(EnvFilter::try_new(&self.level)?, |filter, (target, level)| {
                Ok(filter.add_directive(format!("{}={}", target, level).parse()?))
            })
    }
}

/// Install the global `tracing` subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let subscriber = Registry::default().with(config.filter()?).with(if config.json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    });
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// JSON output, warnings from dependencies and protocol events from this crate
pub fn production_config() -> LogConfig {
    LogConfig {
        level: "warn".to_string(),
        json: true,
        ..LogConfig::default()
    }
    .with_target("rumormesh", "info")
}

/// Readable output with per-message protocol tracing
pub fn development_config() -> LogConfig {
    LogConfig {
        include_location: true,
        ..LogConfig::default()
    }
    .with_target("rumormesh", "debug")
}

/// Append-only line writer a coordinator reports protocol events to
pub trait LogSink: Send + Sync {
    /// Append one line
    fn write_line(&self, line: &str);

    /// Flush and close; later writes are ignored
    fn close(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// File-backed session log, lines prefixed with an RFC 3339 UTC timestamp
pub struct SessionLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl SessionLog {
    /// Open `session_<YYYYMMDDHHMMSS>.log` inside `dir`, creating `dir` if needed
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, RumorError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let stamp = OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day][hour][minute][second]"))
            .map_err(|e| RumorError::config(format!("cannot format session timestamp: {}", e)))?;
        let path = dir.join(format!("session_{}.log", stamp));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for SessionLog {
    fn write_line(&self, line: &str) {
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return;
        };

        let stamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        if let Err(e) = writeln!(writer, "{} {}", stamp, line) {
            warn!("Failed to write session log {}: {}", self.path.display(), e);
        }
    }

    fn close(&self) {
        self.write_line("Closing log");
        if let Some(mut writer) = lock(&self.writer).take() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush session log {}: {}", self.path.display(), e);
            }
        }
    }
}

/// In-memory sink, handy for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|line| line.contains(needle))
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }
}

impl LogSink for MemoryLog {
    fn write_line(&self, line: &str) {
        if !self.is_closed() {
            lock(&self.lines).push(line.to_string());
        }
    }

    fn close(&self) {
        *lock(&self.closed) = true;
    }
}
