//! Trace collector: the facade that turns interactions into records.

use super::normalizers::{classify, describe_decision, NormalizedExchange, NormalizerChain};
use super::redaction::Redactor;
use crate::config::TracerConfig;
use crate::error::{BreadcrumbsError, Result};
use crate::models::{RecordKind, TokenUsage, ToolCall, ToolResponse, TraceRecord};
use crate::storage::{codec_for, BufferedStore, OutputFormat, RecordQuery, StoreStats};
use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// An LLM call reported through the explicit API
#[derive(Debug, Clone, Default)]
pub struct LlmCallEntry {
    /// Prompt text, or an object of role-tagged input
    pub prompt: Value,
    pub response: String,
    pub system_prompt: Option<String>,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    /// Derived from the parts when not given
    pub total_tokens: Option<u64>,
    pub duration_ms: Option<f64>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_responses: Vec<ToolResponse>,
    /// Classified from tool calls and responses when not given
    pub kind: Option<RecordKind>,
    pub metadata: Map<String, Value>,
}

impl LlmCallEntry {
    pub fn new(prompt: impl Into<Value>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = Some(prompt_tokens);
        self.completion_tokens = Some(completion_tokens);
        self
    }

    pub fn with_total_tokens(mut self, total_tokens: u64) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_tool_responses(mut self, tool_responses: Vec<ToolResponse>) -> Self {
        self.tool_responses = tool_responses;
        self
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn into_record(self, session_id: &str) -> TraceRecord {
        let kind = self.kind.unwrap_or_else(|| classify(&self.tool_calls, &self.tool_responses));
        let response = if self.response.trim().is_empty() && !self.tool_calls.is_empty() {
            describe_decision("", &self.tool_calls)
        } else {
            self.response
        };

        let mut record = TraceRecord::new(session_id, kind).with_output("response", response);
        match self.prompt {
            Value::Object(roles) => record.input.extend(roles),
            Value::Null => {}
            prompt => {
                record.input.insert("prompt".to_string(), prompt);
            }
        }
        if let Some(system_prompt) = self.system_prompt {
            record.input.insert("system".to_string(), Value::String(system_prompt));
        }

        let token_usage = TokenUsage::new(self.prompt_tokens, self.completion_tokens, self.total_tokens);
        if !token_usage.is_empty() {
            record.token_usage = Some(token_usage);
        }
        record.model_name = self.model_name;
        record.provider = self.provider;
        record.duration_ms = self.duration_ms;
        record.tool_calls = self.tool_calls;
        record.tool_responses = self.tool_responses;
        record.metadata = self.metadata;
        record.with_computed_cost()
    }
}

/// A tool execution reported through the explicit API
#[derive(Debug, Clone, Default)]
pub struct ToolUseEntry {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_output: Value,
    pub call_id: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
    pub metadata: Map<String, Value>,
}

impl ToolUseEntry {
    pub fn new(tool_name: impl Into<String>, tool_input: impl Into<Value>, tool_output: impl Into<Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input: tool_input.into(),
            tool_output: tool_output.into(),
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn into_record(self, session_id: &str) -> TraceRecord {
        let content = match &self.tool_output {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let mut response = ToolResponse::new(self.tool_name.clone(), content);
        response.call_id = self.call_id;
        response.error = self.error;

        let mut record = TraceRecord::new(session_id, RecordKind::ToolUse)
            .with_input("tool", self.tool_name)
            .with_input("input", self.tool_input)
            .with_output("output", self.tool_output)
            .with_metadata(self.metadata);
        record.duration_ms = self.duration_ms;
        record.tool_responses.push(response);
        record
    }
}

/// Store statistics plus the collector's own state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracerStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub session_id: String,
    pub enabled: bool,
}

impl fmt::Display for TracerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.store)?;
        write!(
            f,
            "Session: {} ({})",
            self.session_id,
            if self.enabled { "enabled" } else { "disabled" }
        )
    }
}

/// Builds trace records from explicit calls, lifecycle hooks and wrapped clients, and
/// hands them to a [`BufferedStore`].
///
/// Recording never fails from the caller's point of view: every `log_*` and
/// `record_*` method returns the new record id, or `None` when the collector is
/// disabled or the record was filtered out.
pub struct TraceCollector {
    config: TracerConfig,
    store: Arc<BufferedStore>,
    session_id: RwLock<String>,
    enabled: AtomicBool,
    normalizers: NormalizerChain,
    redactor: Option<Redactor>,
}

impl TraceCollector {
    /// Create a collector that owns a store opened from `config`
    pub fn new(config: TracerConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(BufferedStore::open(config.to_store_options())?);
        Self::with_store(config, store)
    }

    /// Create a collector that writes into an existing store
    pub fn with_store(config: TracerConfig, store: Arc<BufferedStore>) -> Result<Self> {
        config.validate()?;
        let redactor = Redactor::from_config(&config)?;
        let session_id = config.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            session_id = %session_id,
            path = %store.path().display(),
            format = %store.format(),
            "Trace collector ready"
        );

        Ok(Self {
            config,
            store,
            session_id: RwLock::new(session_id),
            enabled: AtomicBool::new(true),
            normalizers: NormalizerChain::default(),
            redactor,
        })
    }

    /// One-line setup: CSV output at `path` with default settings
    pub fn quick_logger(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            TracerConfig::default()
                .with_output_file(path)
                .with_output_format(OutputFormat::Csv),
        )
    }

    /// Replace the normalizer chain used for intercepted exchanges
    pub fn with_normalizers(mut self, normalizers: NormalizerChain) -> Self {
        self.normalizers = normalizers;
        self
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BufferedStore> {
        &self.store
    }

    pub fn session_id(&self) -> String {
        self.session_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Switch to a freshly generated session id and return it
    pub fn start_new_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = session_id.clone();
        info!(session_id = %session_id, "Started new session");
        session_id
    }

    pub fn set_session(&self, session_id: impl Into<String>) -> Result<()> {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            return Err(BreadcrumbsError::ConfigError("session_id is empty".to_string()));
        }
        info!(session_id = %session_id, "Switched session");
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = session_id;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Log an LLM call; cost is computed before the record is stored
    pub fn log_llm_call(&self, entry: LlmCallEntry) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let record = entry.into_record(&self.session_id());
        self.submit(record)
    }

    pub fn log_tool_use(&self, entry: ToolUseEntry) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let record = entry.into_record(&self.session_id());
        self.submit(record)
    }

    /// Log a reasoning step and the decision it led to
    pub fn log_reasoning(
        &self,
        thought_process: impl Into<String>,
        decision: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let record = TraceRecord::new(self.session_id(), RecordKind::Reasoning)
            .with_input("thought_process", thought_process.into())
            .with_output("decision", decision.into())
            .with_metadata(metadata);
        self.submit(record)
    }

    /// Store a record built elsewhere. Its session id is kept unless it is empty, in
    /// which case the current session is used.
    pub fn log_record(&self, mut record: TraceRecord) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        if record.session_id.trim().is_empty() {
            record.session_id = self.session_id();
        }
        self.submit(record)
    }

    /// Record an intercepted request/response pair. Unknown response shapes degrade to a
    /// generic record; this never fails.
    pub fn record_exchange(&self, request: &Value, response: &Value, duration: Option<Duration>) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let exchange = self.normalizers.normalize(request, response);
        let record = self.exchange_record(exchange, request, response, duration);
        self.submit(record)
    }

    pub(crate) fn normalizers(&self) -> &NormalizerChain {
        &self.normalizers
    }

    pub(crate) fn exchange_record(
        &self,
        exchange: NormalizedExchange,
        request: &Value,
        response: &Value,
        duration: Option<Duration>,
    ) -> TraceRecord {
        let mut record = TraceRecord::new(self.session_id(), exchange.kind)
            .with_output("response", exchange.response_text)
            .with_metadata(exchange.metadata);
        record.input = exchange.input;
        record.tool_calls = exchange.tool_calls;
        record.tool_responses = exchange.tool_responses;
        record.model_name = exchange.model_name;
        record.provider = exchange.provider;
        record.token_usage = exchange.token_usage;
        record.duration_ms = duration.map(|d| d.as_secs_f64() * 1000.0);

        if self.config.include_metadata {
            record.raw_request = Some(request.clone());
            record.raw_response = Some(response.clone());
        }
        record.with_computed_cost()
    }

    /// Apply capture settings, filters and redaction, then buffer the record
    fn submit(&self, mut record: TraceRecord) -> Option<String> {
        let threshold = self.config.min_token_threshold;
        if threshold > 0 {
            if let Some(total) = record.total_tokens().filter(|total| *total < threshold) {
                debug!(total_tokens = total, threshold, "Dropping record below token threshold");
                return None;
            }
        }

        if !self.config.include_system_prompts {
            record.input.remove("system");
        }
        if !self.config.capture_tool_calls {
            record.tool_calls.clear();
        }
        if !self.config.capture_tool_responses {
            record.tool_responses.clear();
        }

        if let Some(redactor) = &self.redactor {
            redactor.redact_map(&mut record.metadata);
            for payload in [record.raw_request.as_mut(), record.raw_response.as_mut()].into_iter().flatten() {
                redactor.redact_value(payload);
            }
        }

        let id = record.id().to_string();
        debug!(
            record_id = %id,
            kind = %record.kind,
            model = record.model_name.as_deref().unwrap_or("unknown"),
            "Recording trace"
        );
        self.store.store(record);
        Some(id)
    }

    /// Records of the current session, oldest first. Buffered records are flushed first.
    ///
    /// A limit of zero means no limit.
    pub fn session_history(&self, limit: Option<usize>) -> Result<Vec<TraceRecord>> {
        self.store.flush()?;
        let mut records = self.store.load(Some(&self.session_id()))?;
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Every persisted record across sessions. Buffered records are flushed first.
    pub fn all_records(&self) -> Result<Vec<TraceRecord>> {
        self.store.flush()?;
        self.store.load(None)
    }

    pub fn query(&self, query: &RecordQuery) -> Result<Vec<TraceRecord>> {
        self.store.flush()?;
        self.store.query(query)
    }

    pub fn sessions(&self) -> Result<Vec<String>> {
        self.store.get_sessions()
    }

    pub fn stats(&self) -> Result<TracerStats> {
        Ok(TracerStats {
            store: self.store.get_stats()?,
            session_id: self.session_id(),
            enabled: self.is_enabled(),
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    /// Write every persisted record into a fresh file of the given format.
    ///
    /// `format` is "csv", "json" or "jsonl"; anything else is an
    /// [`UnsupportedFormat`](BreadcrumbsError::UnsupportedFormat) error. Without an
    /// explicit path the file is named `agent_traces_export_<YYYYmmdd_HHMMSS>.<format>`.
    pub fn export(&self, format: &str, output_file: Option<&Path>) -> Result<PathBuf> {
        let format: OutputFormat = format.parse()?;
        let path = output_file.map(Path::to_path_buf).unwrap_or_else(|| default_export_path(format));
        if resolve_path(&path) == resolve_path(self.store.path()) {
            return Err(BreadcrumbsError::ConfigError(format!(
                "cannot export onto the live trace file {}",
                path.display()
            )));
        }

        let records = self.all_records()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let codec = codec_for(format);
        codec.reset(&path)?;
        if !records.is_empty() {
            codec.append(&path, &records)?;
        }

        info!(path = %path.display(), records = records.len(), %format, "Exported traces");
        Ok(path)
    }
}

/// Canonical form of `path`, resolving through the parent directory when the file
/// itself does not exist yet
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

fn default_export_path(format: OutputFormat) -> PathBuf {
    PathBuf::from(format!(
        "agent_traces_export_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        format
    ))
}

/// Open a collector and return a shareable handle to it
pub fn enable(config: TracerConfig) -> Result<Arc<TraceCollector>> {
    Ok(Arc::new(TraceCollector::new(config)?))
}
