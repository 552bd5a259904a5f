//! Sensitive-key redaction for raw payloads and metadata.

use crate::config::TracerConfig;
use crate::error::Result;
use regex::Regex;
use serde_json::{Map, Value};

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Replaces the values of JSON object keys that match any sensitive pattern.
///
/// Numbers and booleans are left alone so usage counters such as `prompt_tokens`
/// survive a `token` pattern.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// Build a redactor when the configuration asks for one
    pub fn from_config(config: &TracerConfig) -> Result<Option<Self>> {
        if !config.redact_sensitive_data {
            return Ok(None);
        }
        Ok(Some(Self::new(config.compiled_patterns()?)))
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(key))
    }

    pub fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => self.redact_map(map),
            Value::Array(items) => items.iter_mut().for_each(|item| self.redact_value(item)),
            _ => {}
        }
    }

    pub fn redact_map(&self, map: &mut Map<String, Value>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) && matches!(value, Value::String(_) | Value::Object(_) | Value::Array(_)) {
                *value = Value::String(REDACTED.to_string());
            } else {
                self.redact_value(value);
            }
        }
    }
}
