//! Buffered, append-only storage for trace records
//!
//! Records are accumulated in memory and written out in batches, either when the buffer
//! reaches its size threshold, when the background flush thread wakes up, or when a
//! caller flushes explicitly.
//!
//! # Architecture
//!
//! - **BufferedStore**: thread-safe buffer, flush thread, and the read side (load, query, stats)
//! - **RecordCodec**: one implementation per on-disk format
//! - **OutputFormat**: the format selector (`csv`, `json`, `jsonl`)
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use agent_breadcrumbs::storage::{BufferedStore, StoreOptions, OutputFormat};
//!
//! let store = BufferedStore::open(StoreOptions::new("traces.jsonl", OutputFormat::JsonLines))?;
//! store.store(record);
//! store.close();
//!
//! for record in store.load(None)? {
//!     println!("{}", record.printable_summary());
//! }
//! ```

pub mod buffered_store;
pub mod codec;
pub mod csv_codec;
pub mod json_codec;

use crate::error::{BreadcrumbsError, Result};
use crate::models::{RecordKind, TraceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use buffered_store::BufferedStore;
pub use codec::{codec_for, RecordCodec};
pub use csv_codec::{CsvCodec, CSV_HEADER, CSV_SCHEMA_VERSION};
pub use json_codec::{JsonArrayCodec, JsonLinesCodec};

/// Default number of buffered records that triggers a flush
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Default interval between background flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Callback invoked for every record handed to a store
pub type RecordCallback = Arc<dyn Fn(&TraceRecord) + Send + Sync>;

/// On-disk format of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    #[serde(rename = "jsonl")]
    JsonLines,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::JsonLines => "jsonl",
        }
    }

    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str()).ok_or_else(|| {
            BreadcrumbsError::UnsupportedFormat(format!("no file extension on {}", path.display()))
        })?;
        extension.parse()
    }
}

impl FromStr for OutputFormat {
    type Err = BreadcrumbsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "ndjson" => Ok(OutputFormat::JsonLines),
            other => Err(BreadcrumbsError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for opening a [`BufferedStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub buffer_size: usize,
    pub flush_interval: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(BreadcrumbsError::ConfigError(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(BreadcrumbsError::ConfigError(
                "flush_interval must be greater than zero".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(BreadcrumbsError::ConfigError("output path is empty".to_string()));
        }
        Ok(())
    }
}

/// Aggregate view over the persisted records of a store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub total_sessions: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub avg_duration_ms: f64,
    pub buffered_records: usize,
    pub format: OutputFormat,
    pub file_path: PathBuf,
    pub file_size: u64,
}

impl StoreStats {
    /// Aggregate the given records. Records without a cost, token total or duration
    /// do not contribute to the corresponding figure.
    pub fn from_records(records: &[TraceRecord]) -> Self {
        let mut sessions: Vec<&str> = records.iter().map(|r| r.session_id.as_str()).collect();
        sessions.sort_unstable();
        sessions.dedup();

        // An empty f64 sum is -0.0, which would print as "$-0.000000"
        let total_cost = records.iter().filter_map(TraceRecord::cost).fold(0.0, |acc, cost| acc + cost);
        let total_tokens: u64 = records.iter().filter_map(TraceRecord::total_tokens).sum();

        let durations: Vec<f64> = records.iter().filter_map(|r| r.duration_ms).collect();
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Self {
            total_records: records.len(),
            total_sessions: sessions.len(),
            total_cost,
            total_tokens,
            avg_duration_ms,
            buffered_records: 0,
            format: OutputFormat::default(),
            file_path: PathBuf::new(),
            file_size: 0,
        }
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Agent Breadcrumbs Tracing Summary")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Total Traces: {}", self.total_records)?;
        writeln!(f, "Sessions: {}", self.total_sessions)?;
        writeln!(f, "Total Cost: ${:.6}", self.total_cost)?;
        writeln!(f, "Total Tokens: {}", self.total_tokens)?;
        writeln!(f, "Avg Duration: {:.0}ms", self.avg_duration_ms)?;
        writeln!(f, "Buffered: {}", self.buffered_records)?;
        writeln!(f, "Output File: {} ({})", self.file_path.display(), self.format)?;
        write!(f, "{}", "=".repeat(50))
    }
}

/// Filter over persisted records; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub session_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub kind: Option<RecordKind>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn cost_range(mut self, min_cost: Option<f64>, max_cost: Option<f64>) -> Self {
        self.min_cost = min_cost;
        self.max_cost = max_cost;
        self
    }

    /// Test whether a record passes every set filter.
    ///
    /// Cost bounds exclude records without a cost.
    pub fn matches(&self, record: &TraceRecord) -> bool {
        if let Some(session_id) = &self.session_id {
            if &record.session_id != session_id {
                return false;
            }
        }

        if let Some(start) = self.start_time {
            if record.timestamp() < start {
                return false;
            }
        }

        if let Some(end) = self.end_time {
            if record.timestamp() > end {
                return false;
            }
        }

        if let Some(model_name) = &self.model_name {
            if record.model_name.as_ref() != Some(model_name) {
                return false;
            }
        }

        if let Some(provider) = &self.provider {
            if record.provider.as_ref() != Some(provider) {
                return false;
            }
        }

        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }

        if let Some(min_cost) = self.min_cost {
            match record.cost() {
                Some(cost) if cost >= min_cost => {}
                _ => return false,
            }
        }

        if let Some(max_cost) = self.max_cost {
            match record.cost() {
                Some(cost) if cost <= max_cost => {}
                _ => return false,
            }
        }

        true
    }
}
