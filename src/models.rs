//! Trace record data model.
//!
//! A [`TraceRecord`] describes one logged interaction: who produced it, what went in,
//! what came out, how many tokens it used and what it cost. Records are append-only:
//! identity fields are fixed at construction and the derived cost may be set at most
//! once.

use crate::cost;
use crate::error::{BreadcrumbsError, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Kind of interaction a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum RecordKind {
    #[default]
    LlmCall,
    ToolUse,
    Reasoning,
    ToolDecision,
    FinalResponse,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::LlmCall => "llm_call",
            RecordKind::ToolUse => "tool_use",
            RecordKind::Reasoning => "reasoning",
            RecordKind::ToolDecision => "tool_decision",
            RecordKind::FinalResponse => "final_response",
        }
    }

    /// Parse a persisted kind, accepting the legacy "response" spelling.
    ///
    /// Unknown values fall back to [`RecordKind::LlmCall`] so that old or foreign
    /// files still load.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim() {
            "llm_call" | "" => RecordKind::LlmCall,
            "tool_use" => RecordKind::ToolUse,
            "reasoning" => RecordKind::Reasoning,
            "tool_decision" => RecordKind::ToolDecision,
            "final_response" | "response" => RecordKind::FinalResponse,
            other => {
                warn!(kind = other, "Unknown record kind, treating as llm_call");
                RecordKind::LlmCall
            }
        }
    }
}

impl From<String> for RecordKind {
    fn from(value: String) -> Self {
        RecordKind::parse_lenient(&value)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage breakdown; any count may be missing if the provider did not report it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Build a usage breakdown, deriving `total_tokens` from the parts when it is not given.
    pub fn new(
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
        total_tokens: Option<u64>,
    ) -> Self {
        let total_tokens = total_tokens.or(match (prompt_tokens, completion_tokens) {
            (Some(prompt), Some(completion)) => Some(prompt + completion),
            _ => None,
        });

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_object")]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Render as `name(key=value, ...)`; string values are shown unquoted.
    pub fn describe(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}={}", key, s),
                other => format!("{}={}", key, other),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }
}

/// Output of a tool, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: None,
            name: name.into(),
            content: content.into(),
            error: None,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// One logged interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceRecord {
    #[serde(rename = "action_id")]
    id: String,
    pub session_id: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "action_type")]
    pub kind: RecordKind,
    /// Role-tagged input content (`prompt`, `system`, `tool`, `input`, `thought_process`)
    #[serde(deserialize_with = "lenient_object")]
    pub input: Map<String, Value>,
    /// Role-tagged output content (`response`, `output`, `decision`)
    #[serde(deserialize_with = "lenient_object")]
    pub output: Map<String, Value>,
    #[serde(deserialize_with = "lenient_list")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(deserialize_with = "lenient_list")]
    pub tool_responses: Vec<ToolResponse>,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub token_usage: Option<TokenUsage>,
    #[serde(rename = "cost_usd")]
    cost: Option<f64>,
    pub duration_ms: Option<f64>,
    #[serde(deserialize_with = "lenient_object")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

impl Default for TraceRecord {
    fn default() -> Self {
        Self::new("", RecordKind::LlmCall)
    }
}

impl TraceRecord {
    /// Create a record with a fresh id and the current UTC time
    pub fn new(session_id: impl Into<String>, kind: RecordKind) -> Self {
        Self::restore(Uuid::new_v4().to_string(), Utc::now(), session_id, kind)
    }

    /// Rebuild a record with known identity, as read back from storage
    pub fn restore(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
        kind: RecordKind,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            timestamp,
            kind,
            input: Map::new(),
            output: Map::new(),
            tool_calls: Vec::new(),
            tool_responses: Vec::new(),
            model_name: None,
            provider: None,
            token_usage: None,
            cost: None,
            duration_ms: None,
            metadata: Map::new(),
            raw_request: None,
            raw_response: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cost(&self) -> Option<f64> {
        self.cost
    }

    pub fn with_input(mut self, role: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input.insert(role.into(), value.into());
        self
    }

    pub fn with_output(mut self, role: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.insert(role.into(), value.into());
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_token_usage(mut self, token_usage: TokenUsage) -> Self {
        self.token_usage = Some(token_usage);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Compute the cost from the built-in price table, once, at construction time.
    ///
    /// Leaves an already present cost untouched.
    pub fn with_computed_cost(mut self) -> Self {
        if self.cost.is_none() {
            self.cost = self.recalculate_cost();
        }
        self
    }

    /// Set the derived cost. Fails if a cost is already present.
    pub fn set_cost(&mut self, cost: f64) -> Result<()> {
        if self.cost.is_some() {
            return Err(BreadcrumbsError::CostAlreadySet(self.id.clone()));
        }
        self.cost = Some(cost);
        Ok(())
    }

    /// Restore a persisted cost without the set-once check
    pub(crate) fn restore_cost(&mut self, cost: Option<f64>) {
        self.cost = cost;
    }

    /// Compute the cost this record would have today, without storing it
    pub fn recalculate_cost(&self) -> Option<f64> {
        let usage = self.token_usage.as_ref()?;
        let model_name = self.model_name.as_deref()?;
        cost::calculate_cost(usage, model_name)
    }

    pub fn total_tokens(&self) -> Option<u64> {
        self.token_usage.and_then(|usage| usage.total_tokens)
    }

    /// The user prompt, if it was captured as text
    pub fn user_input(&self) -> Option<&str> {
        self.input.get("prompt").and_then(Value::as_str)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.input.get("system").and_then(Value::as_str)
    }

    /// The response text, if it was captured as text
    pub fn response_text(&self) -> Option<&str> {
        self.output.get("response").and_then(Value::as_str)
    }

    pub fn is_tool_call_step(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn has_tool_results(&self) -> bool {
        !self.tool_responses.is_empty()
    }

    pub fn is_final_response(&self) -> bool {
        self.tool_calls.is_empty() && self.response_text().is_some_and(|r| !r.is_empty())
    }

    /// Get a formatted string summary of the record
    pub fn printable_summary(&self) -> String {
        let time_str = self.timestamp.with_timezone(&Local).format("%H:%M:%S%.3f").to_string();

        let mut summary = format!(
            "[{}] {} (session_id: {})\n   Action ID: {}",
            time_str, self.kind, self.session_id, self.id
        );

        if let Some(model) = &self.model_name {
            summary.push_str(&format!("\n   Model: {}", model));
        }

        if let Some(prompt) = self.user_input() {
            summary.push_str(&format!("\n   Prompt: {}", preview(prompt, 100)));
        }

        if let Some(response) = self.response_text() {
            summary.push_str(&format!("\n   Response: {}", preview(response, 100)));
        }

        if !self.tool_calls.is_empty() {
            let count = self.tool_calls.len();
            let plural = if count != 1 { "s" } else { "" };
            summary.push_str(&format!("\n   Tool Calls: {} call{}", count, plural));
        }

        if let Some(total) = self.total_tokens() {
            summary.push_str(&format!("\n   Tokens: {}", total));
        }

        if let Some(cost) = self.cost {
            summary.push_str(&format!("\n   Cost: ${:.6}", cost));
        }

        if let Some(duration) = self.duration_ms {
            summary.push_str(&format!("\n   Duration: {:.2}ms", duration));
        }

        summary
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

/// Accept any JSON value where an object is expected; non-objects become empty
pub(crate) fn lenient_object<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

/// Accept any JSON value where a list is expected; unparsable items are dropped
pub(crate) fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => {
            items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect()
        }
        _ => Vec::new(),
    })
}
