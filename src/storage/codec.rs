//! Record codec abstraction.
//!
//! A codec owns everything format-specific about a backing file: what an empty file
//! looks like, how a batch is appended, and how the file is read back.

use super::csv_codec::CsvCodec;
use super::json_codec::{JsonArrayCodec, JsonLinesCodec};
use super::OutputFormat;
use crate::error::Result;
use crate::models::TraceRecord;
use std::fs;
use std::path::Path;

/// Format-specific persistence for trace records
pub trait RecordCodec: Send + Sync {
    /// The format this codec writes
    fn format(&self) -> OutputFormat;

    /// Write the empty-file representation, replacing any existing content
    fn reset(&self, path: &Path) -> Result<()>;

    /// Append a batch of records in order
    fn append(&self, path: &Path, records: &[TraceRecord]) -> Result<()>;

    /// Read every record in file order, recovering from bad rows where possible
    fn load(&self, path: &Path) -> Result<Vec<TraceRecord>>;

    /// Create the file (and its parent directories) if it does not exist yet
    fn initialize(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.reset(path)
    }
}

/// Get the codec for an output format
pub fn codec_for(format: OutputFormat) -> Box<dyn RecordCodec> {
    match format {
        OutputFormat::Csv => Box::new(CsvCodec),
        OutputFormat::Json => Box::new(JsonArrayCodec),
        OutputFormat::JsonLines => Box::new(JsonLinesCodec),
    }
}
