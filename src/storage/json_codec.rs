//! JSON codecs.
//!
//! [`JsonLinesCodec`] writes one record object per line and appends in place.
//! [`JsonArrayCodec`] keeps the whole file a single JSON array; every append rewrites it
//! through a temporary file that replaces the original atomically.

use super::codec::RecordCodec;
use super::OutputFormat;
use crate::error::{BreadcrumbsError, Result};
use crate::models::TraceRecord;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

/// Newline-delimited JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesCodec;

impl JsonLinesCodec {
    /// True when the file is missing, empty, or ends with a newline
    fn ends_with_newline(path: &Path) -> Result<bool> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(true);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] == b'\n')
    }
}

impl RecordCodec for JsonLinesCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::JsonLines
    }

    fn reset(&self, path: &Path) -> Result<()> {
        File::create(path)?;
        Ok(())
    }

    fn append(&self, path: &Path, records: &[TraceRecord]) -> Result<()> {
        let mut batch = Vec::new();
        // Terminate a partial trailing line so it cannot swallow the first new record
        if !Self::ends_with_newline(path)? {
            warn!(path = %path.display(), "Trace file ends mid-line, terminating it before appending");
            batch.push(b'\n');
        }
        for record in records {
            serde_json::to_writer(&mut batch, record)?;
            batch.push(b'\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&batch)?;
        file.flush()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Vec<TraceRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();

        for (line_number, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<TraceRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_number + 1,
                    error = %e,
                    "Skipping malformed JSON line"
                ),
            }
        }

        Ok(records)
    }
}

/// A single JSON array of records
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayCodec;

impl JsonArrayCodec {
    fn read_array(path: &Path) -> Result<Vec<Value>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Array(items) => Ok(items),
            _ => Err(BreadcrumbsError::StorageError(format!(
                "{} does not contain a JSON array",
                path.display()
            ))),
        }
    }

    fn write_array(path: &Path, items: &[Value]) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, items)?;
            writer.flush()?;
        }
        temp.persist(path).map_err(|e| BreadcrumbsError::IoError(e.error))?;
        Ok(())
    }
}

impl RecordCodec for JsonArrayCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    fn reset(&self, path: &Path) -> Result<()> {
        Self::write_array(path, &[])
    }

    fn append(&self, path: &Path, records: &[TraceRecord]) -> Result<()> {
        let mut items = Self::read_array(path)?;
        for record in records {
            items.push(serde_json::to_value(record)?);
        }
        Self::write_array(path, &items)
    }

    fn load(&self, path: &Path) -> Result<Vec<TraceRecord>> {
        let items = Self::read_array(path)?;
        let mut records = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<TraceRecord>(item) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    index,
                    error = %e,
                    "Skipping malformed JSON record"
                ),
            }
        }

        Ok(records)
    }
}
