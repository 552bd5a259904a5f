//! Tracer configuration.
//!
//! [`TracerConfig`] is a plain value: build it with `Default` and the `with_*` methods,
//! deserialize it, or overlay `BREADCRUMBS_*` environment variables with
//! [`TracerConfig::from_env`].

use crate::error::{BreadcrumbsError, Result};
use crate::storage::{OutputFormat, StoreOptions, DEFAULT_BUFFER_SIZE};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Key patterns redacted when `redact_sensitive_data` is on.
///
/// `token` and `auth` only match whole key segments, so usage fields such as
/// `prompt_tokens_details` and keys like `author` are left alone.
pub const DEFAULT_SENSITIVE_PATTERNS: [&str; 5] = [
    "api[_-]?key",
    "password",
    "secret",
    r"(^|[_.-])token$",
    r"(^|[_.-])auth(orization|entication)?($|[_.-])",
];

/// Settings for a [`TraceCollector`](crate::tracer::TraceCollector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    pub output_file: PathBuf,
    pub output_format: OutputFormat,
    /// Fixed session id; a fresh one is generated when unset
    pub session_id: Option<String>,
    pub buffer_size: usize,
    pub flush_interval_secs: f64,
    pub include_system_prompts: bool,
    /// Keep raw request and response payloads on intercepted records
    pub include_metadata: bool,
    pub capture_tool_calls: bool,
    pub capture_tool_responses: bool,
    /// Drop records whose known token total is below this value
    pub min_token_threshold: u64,
    pub redact_sensitive_data: bool,
    pub sensitive_patterns: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            output_file: PathBuf::from("agent_traces.csv"),
            output_format: OutputFormat::Csv,
            session_id: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval_secs: 5.0,
            include_system_prompts: true,
            include_metadata: true,
            capture_tool_calls: true,
            capture_tool_responses: true,
            min_token_threshold: 0,
            redact_sensitive_data: false,
            sensitive_patterns: DEFAULT_SENSITIVE_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TracerConfig {
    /// Write to `output_file`, inferring the format from its extension
    pub fn for_file(output_file: impl Into<PathBuf>) -> Result<Self> {
        let output_file = output_file.into();
        let output_format = OutputFormat::from_path(&output_file)?;
        Ok(Self {
            output_file,
            output_format,
            ..Default::default()
        })
    }

    /// Defaults overlaid with `BREADCRUMBS_*` environment variables (a `.env` file is
    /// loaded first when present).
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `BREADCRUMBS_OUTPUT_FILE` | `output_file` (format inferred unless also set) |
    /// | `BREADCRUMBS_OUTPUT_FORMAT` | `output_format` |
    /// | `BREADCRUMBS_SESSION_ID` | `session_id` |
    /// | `BREADCRUMBS_BUFFER_SIZE` | `buffer_size` |
    /// | `BREADCRUMBS_FLUSH_INTERVAL` | `flush_interval_secs` |
    /// | `BREADCRUMBS_MIN_TOKENS` | `min_token_threshold` |
    /// | `BREADCRUMBS_REDACT` | `redact_sensitive_data` |
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file) = lookup("BREADCRUMBS_OUTPUT_FILE") {
            config.output_file = PathBuf::from(&file);
            if let Ok(format) = OutputFormat::from_path(&config.output_file) {
                config.output_format = format;
            }
        }
        if let Some(format) = lookup("BREADCRUMBS_OUTPUT_FORMAT") {
            config.output_format = format.parse()?;
        }
        if let Some(session_id) = lookup("BREADCRUMBS_SESSION_ID") {
            config.session_id = Some(session_id);
        }
        if let Some(value) = lookup("BREADCRUMBS_BUFFER_SIZE") {
            config.buffer_size = parse_var("BREADCRUMBS_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = lookup("BREADCRUMBS_FLUSH_INTERVAL") {
            config.flush_interval_secs = parse_var("BREADCRUMBS_FLUSH_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("BREADCRUMBS_MIN_TOKENS") {
            config.min_token_threshold = parse_var("BREADCRUMBS_MIN_TOKENS", &value)?;
        }
        if let Some(value) = lookup("BREADCRUMBS_REDACT") {
            config.redact_sensitive_data = parse_flag("BREADCRUMBS_REDACT", &value)?;
        }

        Ok(config)
    }

    pub fn with_output_file(mut self, output_file: impl Into<PathBuf>) -> Self {
        self.output_file = output_file.into();
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_flush_interval_secs(mut self, flush_interval_secs: f64) -> Self {
        self.flush_interval_secs = flush_interval_secs;
        self
    }

    pub fn with_system_prompts(mut self, include: bool) -> Self {
        self.include_system_prompts = include;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn with_tool_capture(mut self, calls: bool, responses: bool) -> Self {
        self.capture_tool_calls = calls;
        self.capture_tool_responses = responses;
        self
    }

    pub fn with_min_token_threshold(mut self, min_token_threshold: u64) -> Self {
        self.min_token_threshold = min_token_threshold;
        self
    }

    pub fn with_redaction(mut self, patterns: Option<Vec<String>>) -> Self {
        self.redact_sensitive_data = true;
        if let Some(patterns) = patterns {
            self.sensitive_patterns = patterns;
        }
        self
    }

    /// Check the settings before anything is opened
    pub fn validate(&self) -> Result<()> {
        if self.output_file.as_os_str().is_empty() {
            return Err(BreadcrumbsError::ConfigError("output_file is empty".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(BreadcrumbsError::ConfigError(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        if !self.flush_interval_secs.is_finite() || self.flush_interval_secs <= 0.0 {
            return Err(BreadcrumbsError::ConfigError(format!(
                "flush_interval_secs must be positive, got {}",
                self.flush_interval_secs
            )));
        }
        if matches!(&self.session_id, Some(id) if id.trim().is_empty()) {
            return Err(BreadcrumbsError::ConfigError("session_id is empty".to_string()));
        }
        if self.redact_sensitive_data {
            self.compiled_patterns()?;
        }
        Ok(())
    }

    /// Compile `sensitive_patterns` as case-insensitive regexes
    pub fn compiled_patterns(&self) -> Result<Vec<Regex>> {
        self.sensitive_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern).case_insensitive(true).build().map_err(|e| {
                    BreadcrumbsError::ConfigError(format!(
                        "invalid sensitive pattern '{}': {}",
                        pattern, e
                    ))
                })
            })
            .collect()
    }

    /// Flush interval as a `Duration`; zero when the configured value is not usable
    pub fn flush_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.flush_interval_secs).unwrap_or(Duration::ZERO)
    }

    /// Store settings derived from this configuration
    pub fn to_store_options(&self) -> StoreOptions {
        StoreOptions::new(self.output_file.clone(), self.output_format)
            .with_buffer_size(self.buffer_size)
            .with_flush_interval(self.flush_interval())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| BreadcrumbsError::ConfigError(format!("{}='{}': {}", name, value, e)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(BreadcrumbsError::ConfigError(format!(
            "{}='{}' is not a boolean",
            name, other
        ))),
    }
}
