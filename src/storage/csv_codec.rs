//! CSV codec.
//!
//! Every row carries every column; absent values are empty cells. Structured fields are
//! embedded JSON text inside a single cell. Reading is driven by the file's own header
//! row, so files written with the older, shorter header still load.

use super::codec::RecordCodec;
use super::OutputFormat;
use crate::error::Result;
use crate::models::{RecordKind, TokenUsage, ToolCall, ToolResponse, TraceRecord};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Version of the column layout in [`CSV_HEADER`]
pub const CSV_SCHEMA_VERSION: u32 = 2;

/// Column header written once when a CSV file is created
pub const CSV_HEADER: [&str; 16] = [
    "action_id",
    "session_id",
    "timestamp",
    "action_type",
    "input_data",
    "output_data",
    "tool_calls",
    "tool_responses",
    "model_name",
    "provider",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "cost_usd",
    "duration_ms",
    "metadata",
];

/// Codec for comma-separated files
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

impl CsvCodec {
    /// Header of an existing, non-empty file
    fn existing_header(path: &Path) -> Result<Option<Vec<String>>> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Ok(None),
        }
        let mut reader = csv::Reader::from_path(path)?;
        let header = reader.headers()?.iter().map(String::from).collect();
        Ok(Some(header))
    }
}

impl RecordCodec for CsvCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::Csv
    }

    fn reset(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(())
    }

    fn append(&self, path: &Path, records: &[TraceRecord]) -> Result<()> {
        let existing = Self::existing_header(path)?;
        let columns: Vec<String> = match &existing {
            Some(header) => {
                if header.iter().map(String::as_str).ne(CSV_HEADER.iter().copied()) {
                    debug!(path = %path.display(), "Appending to CSV with a legacy header layout");
                }
                header.clone()
            }
            None => CSV_HEADER.iter().map(|c| c.to_string()).collect(),
        };

        // Serialize the whole batch before touching the file so a failure never leaves
        // half a batch behind.
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        if existing.is_none() {
            writer.write_record(&columns)?;
        }
        for record in records {
            writer.write_record(record_to_row(record, &columns)?)?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Vec<TraceRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let columns = ColumnIndex::new(reader.headers()?);
        let mut records = Vec::new();

        for (row_number, row) in reader.records().enumerate() {
            match row {
                Ok(row) => records.push(columns.to_record(&row)),
                Err(e) => warn!(
                    path = %path.display(),
                    row = row_number + 1,
                    error = %e,
                    "Skipping unreadable CSV row"
                ),
            }
        }

        Ok(records)
    }
}

/// Serialize a record into the given column layout; unknown columns get empty cells
fn record_to_row(record: &TraceRecord, columns: &[String]) -> Result<Vec<String>> {
    let usage = record.token_usage.unwrap_or_default();

    columns
        .iter()
        .map(|column| {
            Ok(match column.as_str() {
                "action_id" => record.id().to_string(),
                "session_id" => record.session_id.clone(),
                "timestamp" => record.timestamp().to_rfc3339_opts(SecondsFormat::AutoSi, true),
                "action_type" => record.kind.as_str().to_string(),
                "input_data" => serde_json::to_string(&record.input)?,
                "output_data" => serde_json::to_string(&record.output)?,
                "tool_calls" => serde_json::to_string(&record.tool_calls)?,
                "tool_responses" => serde_json::to_string(&record.tool_responses)?,
                "model_name" => record.model_name.clone().unwrap_or_default(),
                "provider" => record.provider.clone().unwrap_or_default(),
                "prompt_tokens" => optional_cell(usage.prompt_tokens),
                "completion_tokens" => optional_cell(usage.completion_tokens),
                "total_tokens" => optional_cell(usage.total_tokens),
                "cost_usd" => optional_cell(record.cost()),
                "duration_ms" => optional_cell(record.duration_ms),
                "metadata" => serde_json::to_string(&record.metadata)?,
                _ => String::new(),
            })
        })
        .collect()
}

fn optional_cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Column positions of a header row, looked up by name
struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(header: &csv::StringRecord) -> Self {
        Self {
            positions: header
                .iter()
                .enumerate()
                .map(|(index, name)| (name.trim().to_string(), index))
                .collect(),
        }
    }

    fn cell<'r>(&self, row: &'r csv::StringRecord, column: &str) -> &'r str {
        self.positions
            .get(column)
            .and_then(|&index| row.get(index))
            .map(str::trim)
            .unwrap_or("")
    }

    fn to_record(&self, row: &csv::StringRecord) -> TraceRecord {
        let id = match self.cell(row, "action_id") {
            "" => Uuid::new_v4().to_string(),
            id => id.to_string(),
        };

        let mut record = TraceRecord::restore(
            id,
            parse_timestamp(self.cell(row, "timestamp")),
            self.cell(row, "session_id"),
            RecordKind::parse_lenient(self.cell(row, "action_type")),
        );

        record.input = parse_object(self.cell(row, "input_data"));
        record.output = parse_object(self.cell(row, "output_data"));
        record.metadata = parse_object(self.cell(row, "metadata"));
        record.tool_calls = parse_list::<ToolCall>(self.cell(row, "tool_calls"));
        record.tool_responses = parse_list::<ToolResponse>(self.cell(row, "tool_responses"));
        record.model_name = non_empty(self.cell(row, "model_name"));
        record.provider = non_empty(self.cell(row, "provider"));

        let usage = TokenUsage {
            prompt_tokens: parse_count(self.cell(row, "prompt_tokens")),
            completion_tokens: parse_count(self.cell(row, "completion_tokens")),
            total_tokens: parse_count(self.cell(row, "total_tokens")),
        };
        record.token_usage = if usage.is_empty() { None } else { Some(usage) };

        record.restore_cost(parse_float(self.cell(row, "cost_usd")));
        record.duration_ms = parse_float(self.cell(row, "duration_ms"));
        record
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc);
    }
    // Naive ISO timestamps are written in UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    warn!(timestamp = value, "Unparsable timestamp, using current time");
    Utc::now()
}

fn parse_object(value: &str) -> Map<String, Value> {
    if value.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(value) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            debug!(error = %e, "Malformed embedded JSON object, using empty object");
            Map::new()
        }
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(value: &str) -> Vec<T> {
    if value.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(value) {
        Ok(Value::Array(items)) => {
            items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect()
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(error = %e, "Malformed embedded JSON list, using empty list");
            Vec::new()
        }
    }
}

fn parse_count(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    if let Ok(count) = value.parse::<u64>() {
        return Some(count);
    }
    // Some writers emit integral counts as floats ("10.0")
    match value.parse::<f64>() {
        Ok(float) if float.is_finite() && float >= 0.0 && float.fract() == 0.0 => {
            Some(float as u64)
        }
        _ => {
            debug!(value, "Unparsable token count, treating as absent");
            None
        }
    }
}

fn parse_float(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    match value.parse::<f64>() {
        Ok(float) if float.is_finite() => Some(float),
        _ => {
            debug!(value, "Unparsable number, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_record(session_id: &str) -> TraceRecord {
        let mut args = Map::new();
        args.insert("expression".to_string(), json!("25 + 17"));

        let mut record = TraceRecord::new(session_id, RecordKind::ToolDecision)
            .with_input("prompt", "What's 25 + 17?\nUse a tool, please.")
            .with_output("response", "Decided to call tool: calculator(expression=25 + 17)")
            .with_model("gpt-4o-mini-2024-07-18")
            .with_token_usage(TokenUsage::new(Some(120), Some(18), None))
            .with_duration_ms(431.25)
            .with_computed_cost();
        record.provider = Some("openai".to_string());
        record.tool_calls.push(ToolCall::new("calculator", args).with_id("call_1"));
        record.metadata.insert("tags".to_string(), json!(["a", "b,c"]));
        record
    }

    #[test]
    fn test_reset_writes_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.csv");

        CsvCodec.reset(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), CSV_HEADER.join(","));
        assert!(CsvCodec.load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_schema_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.csv");
        CsvCodec.initialize(&path).unwrap();

        let original = sample_record("session-1");
        CsvCodec.append(&path, std::slice::from_ref(&original)).unwrap();

        let loaded = CsvCodec.load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let record = &loaded[0];

        assert_eq!(record.id(), original.id());
        assert_eq!(record.session_id, original.session_id);
        assert_eq!(record.timestamp(), original.timestamp());
        assert_eq!(record.kind, RecordKind::ToolDecision);
        assert_eq!(record.token_usage, original.token_usage);
        assert_eq!(record.cost(), original.cost());
        assert_eq!(record.duration_ms, Some(431.25));
        assert_eq!(record.input, original.input);
        assert_eq!(record.tool_calls, original.tool_calls);
        assert_eq!(record.metadata, original.metadata);
        assert_eq!(record.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_every_row_has_every_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.csv");

        let bare = TraceRecord::new("s", RecordKind::Reasoning);
        CsvCodec.append(&path, &[bare, sample_record("s")]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), CSV_HEADER.len());
        for row in reader.records() {
            let row = row.unwrap();
            assert_eq!(row.len(), CSV_HEADER.len());
            assert_ne!(row.get(10), Some("null"));
        }
    }

    #[test]
    fn test_empty_cells_are_absent_not_zero() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.csv");
        let content = format!(
            "{}\nid-1,s1,2025-01-01T00:00:00Z,llm_call,{{}},{{}},[],[],gpt-4o,,,5,,,,{{}}\n",
            CSV_HEADER.join(",")
        );
        fs::write(&path, content).unwrap();

        let loaded = CsvCodec.load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let usage = loaded[0].token_usage.unwrap();
        assert_eq!(usage.prompt_tokens, None);
        assert_eq!(usage.completion_tokens, Some(5));
        assert_eq!(loaded[0].cost(), None);
        assert_eq!(loaded[0].duration_ms, None);
    }

    #[test]
    fn test_legacy_header_and_malformed_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("legacy.csv");
        let content = "action_id,session_id,timestamp,action_type,input_data,output_data,model_name,prompt_tokens,completion_tokens,total_tokens,cost_usd,duration_ms,metadata\n\
            a1,s1,2024-06-01T12:30:00.123456,response,\"{\"\"prompt\"\": \"\"hi\"\"}\",not-json,gpt-4,10,20,30,0.0015,12.5,{broken\n";
        fs::write(&path, content).unwrap();

        let loaded = CsvCodec.load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let record = &loaded[0];

        assert_eq!(record.id(), "a1");
        assert_eq!(record.kind, RecordKind::FinalResponse);
        assert_eq!(record.user_input(), Some("hi"));
        assert!(record.output.is_empty());
        assert!(record.metadata.is_empty());
        assert!(record.tool_calls.is_empty());
        assert_eq!(record.provider, None);
        assert_eq!(record.total_tokens(), Some(30));
        assert_eq!(record.cost(), Some(0.0015));
        assert_eq!(record.timestamp().format("%Y-%m-%d %H:%M").to_string(), "2024-06-01 12:30");
    }

    #[test]
    fn test_append_to_legacy_file_keeps_its_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("legacy.csv");
        fs::write(
            &path,
            "action_id,session_id,timestamp,action_type,input_data,output_data,model_name,prompt_tokens,completion_tokens,total_tokens,cost_usd,duration_ms,metadata\n",
        )
        .unwrap();

        let original = sample_record("s9");
        CsvCodec.append(&path, std::slice::from_ref(&original)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.len(), 13);

        let loaded = CsvCodec.load(&path).unwrap();
        assert_eq!(loaded[0].id(), original.id());
        assert_eq!(loaded[0].token_usage, original.token_usage);
    }

    #[test]
    fn test_float_formatted_counts() {
        assert_eq!(parse_count("10.0"), Some(10));
        assert_eq!(parse_count("abc"), None);
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_float("nan"), None);
    }
}
