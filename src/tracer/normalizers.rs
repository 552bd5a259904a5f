//! Response normalizers.
//!
//! Providers describe the same exchange in different shapes. Each [`ResponseNormalizer`]
//! recognizes one shape with a cheap structural test and turns a request/response pair
//! into a [`NormalizedExchange`]. A [`NormalizerChain`] tries them in order and always
//! ends with [`GenericNormalizer`], so an unknown shape still yields something loggable.
//!
//! To support a new provider, add a strategy and prepend it with
//! [`NormalizerChain::with_normalizer`].

use crate::error::{BreadcrumbsError, Result};
use crate::models::{RecordKind, TokenUsage, ToolCall, ToolResponse};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Class names LangChain reports in place of a real model name
const LANGCHAIN_CLASS_NAMES: [&str; 4] = ["ChatOpenAI", "OpenAI", "AzureChatOpenAI", "ChatAnthropic"];

/// Provider-independent view of one request/response pair
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedExchange {
    pub kind: RecordKind,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    /// Role-tagged input (`prompt`, `system`, ...)
    pub input: Map<String, Value>,
    /// Human-readable response, synthesized for pure tool-call decisions
    pub response_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_responses: Vec<ToolResponse>,
    pub token_usage: Option<TokenUsage>,
    pub metadata: Map<String, Value>,
}

impl NormalizedExchange {
    /// Smallest useful description of an exchange nothing could interpret
    pub fn minimal(request: &Value, response: &Value) -> Self {
        let response_text = match response {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Self {
            model_name: str_field(request, "model").map(String::from),
            response_text,
            ..Default::default()
        }
    }

    /// Fill `kind` and the decision text from the tool calls and responses found
    fn finish(mut self) -> Self {
        self.kind = classify(&self.tool_calls, &self.tool_responses);
        self.response_text = describe_decision(&self.response_text, &self.tool_calls);
        self
    }
}

/// A strategy for one provider response shape
pub trait ResponseNormalizer: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap structural test; no parsing beyond key presence
    fn matches(&self, request: &Value, response: &Value) -> bool;

    fn normalize(&self, request: &Value, response: &Value) -> Result<NormalizedExchange>;
}

/// Ordered list of normalizers; the first match that succeeds wins
pub struct NormalizerChain {
    normalizers: Vec<Box<dyn ResponseNormalizer>>,
}

impl Default for NormalizerChain {
    fn default() -> Self {
        Self {
            normalizers: vec![
                Box::new(OpenAiChatNormalizer),
                Box::new(AnthropicMessagesNormalizer),
                Box::new(LangChainResultNormalizer),
                Box::new(GenericNormalizer),
            ],
        }
    }
}

impl NormalizerChain {
    /// Try `normalizer` before every built-in strategy
    pub fn with_normalizer(mut self, normalizer: impl ResponseNormalizer + 'static) -> Self {
        self.normalizers.insert(0, Box::new(normalizer));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.normalizers.iter().map(|n| n.name()).collect()
    }

    /// Normalize an exchange. Never fails: a strategy that errors hands over to the next
    /// matching one, and when none succeeds a minimal exchange is returned.
    pub fn normalize(&self, request: &Value, response: &Value) -> NormalizedExchange {
        for normalizer in self.normalizers.iter().filter(|n| n.matches(request, response)) {
            match normalizer.normalize(request, response) {
                Ok(mut exchange) => {
                    debug!(normalizer = normalizer.name(), kind = %exchange.kind, "Normalized exchange");
                    exchange
                        .metadata
                        .insert("normalizer".to_string(), Value::String(normalizer.name().to_string()));
                    return exchange;
                }
                Err(e) => warn!(
                    normalizer = normalizer.name(),
                    error = %e,
                    "Normalizer failed, trying the next one"
                ),
            }
        }

        warn!("No normalizer could interpret the exchange, recording a minimal record");
        NormalizedExchange::minimal(request, response)
    }
}

/// OpenAI-compatible chat completions (`choices[].message`)
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChatNormalizer;

impl ResponseNormalizer for OpenAiChatNormalizer {
    fn name(&self) -> &str {
        "openai_chat"
    }

    fn matches(&self, _request: &Value, response: &Value) -> bool {
        response.get("choices").is_some_and(Value::is_array)
    }

    fn normalize(&self, request: &Value, response: &Value) -> Result<NormalizedExchange> {
        let choice = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| BreadcrumbsError::NormalizationError("response has no choices".to_string()))?;

        let transcript = Transcript::from_request(request);
        let message = choice.get("message").unwrap_or(&Value::Null);

        let response_text = message
            .get("content")
            .and_then(content_text)
            .or_else(|| str_field(choice, "text").map(String::from))
            .unwrap_or_default();

        let mut tool_calls: Vec<ToolCall> = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(openai_tool_call).collect())
            .unwrap_or_default();
        if let Some(function_call) = message.get("function_call") {
            tool_calls.extend(openai_function(function_call, None));
        }

        let mut metadata = Map::new();
        copy_field(choice, "finish_reason", &mut metadata);
        if let Some(id) = response.get("id") {
            metadata.insert("response_id".to_string(), id.clone());
        }

        Ok(NormalizedExchange {
            kind: RecordKind::LlmCall,
            model_name: model_name(request, response),
            provider: Some("openai".to_string()),
            input: transcript.input,
            response_text,
            tool_calls,
            tool_responses: transcript.tool_responses,
            token_usage: response.get("usage").and_then(normalize_usage),
            metadata,
        }
        .finish())
    }
}

/// Anthropic messages (`content` blocks plus `type: "message"` or `stop_reason`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessagesNormalizer;

impl ResponseNormalizer for AnthropicMessagesNormalizer {
    fn name(&self) -> &str {
        "anthropic_messages"
    }

    fn matches(&self, _request: &Value, response: &Value) -> bool {
        response.get("content").is_some_and(Value::is_array)
            && (str_field(response, "type") == Some("message") || response.get("stop_reason").is_some())
    }

    fn normalize(&self, request: &Value, response: &Value) -> Result<NormalizedExchange> {
        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| BreadcrumbsError::NormalizationError("response has no content".to_string()))?;

        let response_text = response.get("content").and_then(content_text).unwrap_or_default();
        let tool_calls = blocks
            .iter()
            .filter(|block| str_field(block, "type") == Some("tool_use"))
            .filter_map(|block| {
                let name = str_field(block, "name")?;
                let mut call = ToolCall::new(name, parse_arguments(block.get("input").unwrap_or(&Value::Null)));
                call.id = str_field(block, "id").map(String::from);
                Some(call)
            })
            .collect();

        let mut metadata = Map::new();
        copy_field(response, "stop_reason", &mut metadata);
        if let Some(id) = response.get("id") {
            metadata.insert("response_id".to_string(), id.clone());
        }

        let transcript = Transcript::from_request(request);
        Ok(NormalizedExchange {
            kind: RecordKind::LlmCall,
            model_name: model_name(request, response),
            provider: Some("anthropic".to_string()),
            input: transcript.input,
            response_text,
            tool_calls,
            tool_responses: transcript.tool_responses,
            token_usage: response.get("usage").and_then(normalize_usage),
            metadata,
        }
        .finish())
    }
}

/// LangChain `LLMResult` (`generations[][]`), as delivered to callback handlers.
///
/// The request side may carry `prompts` (flat "System:/Human:/AI:/Tool:" transcripts),
/// `messages`, `serialized`, `metadata` and `tags`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LangChainResultNormalizer;

impl LangChainResultNormalizer {
    fn generation(response: &Value) -> Option<&Value> {
        response.get("generations")?.as_array()?.first()?.as_array()?.first()
    }

    fn response_text(generation: &Value) -> String {
        str_field(generation, "text")
            .map(String::from)
            .or_else(|| {
                generation
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .and_then(content_text)
            })
            .unwrap_or_default()
    }

    fn tool_calls(generation: &Value) -> Vec<ToolCall> {
        let Some(message) = generation.get("message") else {
            return Vec::new();
        };

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array).filter(|c| !c.is_empty()) {
            return calls
                .iter()
                .map(|call| {
                    let name = str_field(call, "name").unwrap_or("unknown_tool");
                    let mut tool_call =
                        ToolCall::new(name, parse_arguments(call.get("args").unwrap_or(&Value::Null)));
                    tool_call.id = str_field(call, "id").map(String::from);
                    tool_call
                })
                .collect();
        }

        message
            .get("additional_kwargs")
            .and_then(|kwargs| kwargs.get("tool_calls"))
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(openai_tool_call).collect())
            .unwrap_or_default()
    }

    fn model_name(request: &Value, response: &Value) -> Option<String> {
        let known = |value: Option<&str>| value.filter(|name| *name != "unknown").map(String::from);

        if let Some(llm_output) = response.get("llm_output").filter(|v| v.is_object()) {
            for key in ["model_name", "ls_model_name", "model"] {
                if let Some(name) = known(str_field(llm_output, key)) {
                    return Some(name);
                }
            }
        }

        if let Some(name) = request.get("metadata").and_then(|m| known(str_field(m, "ls_model_name"))) {
            return Some(name);
        }

        let serialized = request.get("serialized")?;
        let candidate = serialized
            .get("kwargs")
            .and_then(|kwargs| str_field(kwargs, "model_name").or_else(|| str_field(kwargs, "model")))
            .or_else(|| match serialized.get("id") {
                Some(Value::Array(path)) => path.last().and_then(Value::as_str),
                Some(Value::String(id)) => Some(id.as_str()),
                _ => None,
            })
            .or_else(|| str_field(serialized, "model_name"))
            .or_else(|| str_field(serialized, "model"))?;

        if LANGCHAIN_CLASS_NAMES.iter().any(|class_name| *class_name == candidate) {
            None
        } else {
            known(Some(candidate))
        }
    }

    fn token_usage(response: &Value) -> Option<TokenUsage> {
        if let Some(llm_output) = response.get("llm_output") {
            for key in ["token_usage", "usage"] {
                if let Some(usage) = llm_output.get(key).and_then(normalize_usage) {
                    return Some(usage);
                }
            }
        }

        let generations = response.get("generations")?.as_array()?;
        generations
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .find_map(|generation| {
                let info = generation.get("generation_info");
                info.and_then(|i| i.get("usage"))
                    .and_then(normalize_usage)
                    .or_else(|| info.and_then(|i| i.get("token_usage")).and_then(normalize_usage))
                    .or_else(|| {
                        generation
                            .get("message")
                            .and_then(|m| m.get("usage_metadata"))
                            .and_then(normalize_usage)
                    })
            })
    }

    fn transcript(request: &Value) -> Transcript {
        if request.get("messages").is_some_and(Value::is_array) {
            return Transcript::from_request(request);
        }
        let invocation_messages = request
            .get("invocation_params")
            .and_then(|params| params.get("messages"))
            .filter(|messages| messages.as_array().is_some_and(|m| !m.is_empty()));
        if let Some(messages) = invocation_messages {
            return Transcript::from_messages(messages);
        }

        let prompts: Vec<&str> = request
            .get("prompts")
            .and_then(Value::as_array)
            .map(|prompts| prompts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        Transcript::from_flat_prompt(&prompts.join("\n"))
    }
}

impl ResponseNormalizer for LangChainResultNormalizer {
    fn name(&self) -> &str {
        "langchain_result"
    }

    fn matches(&self, _request: &Value, response: &Value) -> bool {
        response.get("generations").is_some_and(Value::is_array)
    }

    fn normalize(&self, request: &Value, response: &Value) -> Result<NormalizedExchange> {
        let generation = Self::generation(response)
            .ok_or_else(|| BreadcrumbsError::NormalizationError("result has no generations".to_string()))?;

        let transcript = Self::transcript(request);

        let mut metadata = Map::new();
        metadata.insert(
            "langchain_streaming".to_string(),
            Value::Bool(response.get("llm_output").map_or(true, Value::is_null)),
        );
        if let Some(tags) = request.get("tags").filter(|t| t.as_array().is_some_and(|a| !a.is_empty())) {
            metadata.insert("langchain_tags".to_string(), tags.clone());
        }
        if let Some(Value::Object(extra)) = request.get("metadata") {
            for (key, value) in extra {
                metadata.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        Ok(NormalizedExchange {
            kind: RecordKind::LlmCall,
            model_name: Self::model_name(request, response),
            provider: Some("langchain".to_string()),
            input: transcript.input,
            response_text: Self::response_text(generation),
            tool_calls: Self::tool_calls(generation),
            tool_responses: transcript.tool_responses,
            token_usage: Self::token_usage(response),
            metadata,
        }
        .finish())
    }
}

/// Fallback for shapes nobody else recognizes
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericNormalizer;

impl ResponseNormalizer for GenericNormalizer {
    fn name(&self) -> &str {
        "generic"
    }

    fn matches(&self, _request: &Value, _response: &Value) -> bool {
        true
    }

    fn normalize(&self, request: &Value, response: &Value) -> Result<NormalizedExchange> {
        let mut transcript = Transcript::from_request(request);
        for key in ["prompt", "input"] {
            if transcript.input.contains_key("prompt") {
                break;
            }
            if let Some(text) = request.get(key).and_then(content_text) {
                transcript.input.insert("prompt".to_string(), Value::String(text));
            }
        }

        let response_text = match response {
            Value::String(text) => text.clone(),
            _ => ["text", "output", "content", "response", "completion"]
                .iter()
                .find_map(|key| response.get(*key).and_then(content_text))
                .or_else(|| {
                    response
                        .get("message")
                        .and_then(|message| message.get("content"))
                        .and_then(content_text)
                })
                .unwrap_or_default(),
        };

        let token_usage = ["usage", "token_usage", "usage_metadata"]
            .iter()
            .find_map(|key| response.get(*key).and_then(normalize_usage));

        Ok(NormalizedExchange {
            kind: RecordKind::LlmCall,
            model_name: model_name(request, response),
            provider: None,
            input: transcript.input,
            response_text,
            tool_calls: Vec::new(),
            tool_responses: transcript.tool_responses,
            token_usage,
            metadata: Map::new(),
        }
        .finish())
    }
}

/// Input roles and tool results recovered from a request
#[derive(Debug, Default)]
struct Transcript {
    input: Map<String, Value>,
    tool_responses: Vec<ToolResponse>,
}

impl Transcript {
    fn from_request(request: &Value) -> Self {
        let mut transcript = request.get("messages").map(Self::from_messages).unwrap_or_default();

        // Anthropic puts the system prompt beside the messages
        if let Some(system) = request.get("system").and_then(content_text) {
            transcript.input.insert("system".to_string(), Value::String(system));
        }
        transcript
    }

    fn from_messages(messages: &Value) -> Self {
        let mut transcript = Self::default();
        let Some(messages) = messages.as_array() else {
            return transcript;
        };

        for message in messages {
            let role = str_field(message, "role").or_else(|| str_field(message, "type")).unwrap_or("");
            let content = message.get("content").unwrap_or(&Value::Null);

            match role {
                "system" | "developer" => {
                    if let Some(text) = content_text(content) {
                        transcript.input.insert("system".to_string(), Value::String(text));
                    }
                }
                "user" | "human" => {
                    if let Value::Array(blocks) = content {
                        transcript.tool_responses.extend(
                            blocks
                                .iter()
                                .filter(|block| str_field(block, "type") == Some("tool_result"))
                                .map(anthropic_tool_result),
                        );
                    }
                    if let Some(text) = content_text(content) {
                        transcript.input.insert("prompt".to_string(), Value::String(text));
                    }
                }
                "tool" | "function" => {
                    let mut response = ToolResponse::new(
                        str_field(message, "name").unwrap_or_default(),
                        content_text(content).unwrap_or_default(),
                    );
                    response.call_id = str_field(message, "tool_call_id").map(String::from);
                    transcript.tool_responses.push(response);
                }
                _ => {}
            }
        }

        transcript
    }

    /// Parse a flat "System: / Human: / AI: / Tool:" transcript. Lines without a role
    /// prefix continue the current role; leading unprefixed text is the human turn.
    fn from_flat_prompt(text: &str) -> Self {
        let mut transcript = Self::default();
        let mut current: Option<(&str, Vec<&str>)> = None;

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let prefixed = [("System:", "system"), ("Human:", "human"), ("AI:", "ai"), ("Tool:", "tool")]
                .iter()
                .find_map(|(prefix, role)| line.strip_prefix(prefix).map(|rest| (*role, rest.trim())));

            match prefixed {
                Some((role, rest)) => {
                    if let Some((previous, lines)) = current.take() {
                        transcript.push_segment(previous, &lines);
                    }
                    current = Some((role, vec![rest]));
                }
                None => {
                    if let Some((_, lines)) = current.as_mut() {
                        lines.push(line);
                    } else {
                        current = Some(("human", vec![line]));
                    }
                }
            }
        }
        if let Some((role, lines)) = current {
            transcript.push_segment(role, &lines);
        }

        transcript
    }

    fn push_segment(&mut self, role: &str, lines: &[&str]) {
        let content = lines.join("\n").trim().to_string();
        if content.is_empty() {
            return;
        }
        match role {
            "tool" => self.tool_responses.push(ToolResponse::new("", content)),
            "human" => {
                self.input.insert("prompt".to_string(), Value::String(content));
            }
            other => {
                self.input.insert(other.to_string(), Value::String(content));
            }
        }
    }
}

/// Tool calls in the response make a decision; tool results in the request make the
/// answer that follows them final.
pub fn classify(tool_calls: &[ToolCall], tool_responses: &[ToolResponse]) -> RecordKind {
    if !tool_calls.is_empty() {
        RecordKind::ToolDecision
    } else if !tool_responses.is_empty() {
        RecordKind::FinalResponse
    } else {
        RecordKind::LlmCall
    }
}

/// Human-readable response for an exchange that may have requested tools
pub fn describe_decision(text: &str, tool_calls: &[ToolCall]) -> String {
    if tool_calls.is_empty() {
        return text.to_string();
    }

    let calls = tool_calls.iter().map(ToolCall::describe).collect::<Vec<_>>().join(", ");
    if text.trim().is_empty() {
        let noun = if tool_calls.len() == 1 { "tool" } else { "tools" };
        format!("Decided to call {}: {}", noun, calls)
    } else {
        format!("{}\n\nTool calls: {}", text, calls)
    }
}

/// Map provider usage objects onto [`TokenUsage`], accepting both
/// `prompt_tokens/completion_tokens` and `input_tokens/output_tokens` spellings.
pub fn normalize_usage(usage: &Value) -> Option<TokenUsage> {
    let usage = usage.as_object()?;
    let pick = |primary: &str, alternate: &str| {
        usage
            .get(primary)
            .and_then(token_count)
            .or_else(|| usage.get(alternate).and_then(token_count))
    };

    let token_usage = TokenUsage::new(
        pick("prompt_tokens", "input_tokens"),
        pick("completion_tokens", "output_tokens"),
        usage.get("total_tokens").and_then(token_count),
    );
    if token_usage.is_empty() {
        None
    } else {
        Some(token_usage)
    }
}

fn token_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|count| count.is_finite() && *count >= 0.0 && count.fract() == 0.0)
            .map(|count| count as u64)
    })
}

/// Text of a content value: a string, or the text blocks of a block list
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(_) if str_field(block, "type").map_or(true, |t| t == "text") => {
                        block.get("text").and_then(Value::as_str)
                    }
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

/// Tool arguments as an object; JSON strings are parsed, anything else is wrapped
fn parse_arguments(arguments: &Value) -> Map<String, Value> {
    let wrap = |value: Value| {
        let mut map = Map::new();
        map.insert("input".to_string(), value);
        map
    };

    match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(text) if text.trim().is_empty() => Map::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(other) => wrap(other),
            Err(_) => wrap(arguments.clone()),
        },
        other => wrap(other.clone()),
    }
}

fn openai_tool_call(call: &Value) -> Option<ToolCall> {
    openai_function(call.get("function")?, str_field(call, "id"))
}

fn openai_function(function: &Value, id: Option<&str>) -> Option<ToolCall> {
    let name = str_field(function, "name")?;
    let mut call = ToolCall::new(name, parse_arguments(function.get("arguments").unwrap_or(&Value::Null)));
    call.id = id.map(String::from);
    Some(call)
}

fn anthropic_tool_result(block: &Value) -> ToolResponse {
    let content = block.get("content").and_then(content_text).unwrap_or_default();
    let mut response = ToolResponse::new("", content.clone());
    response.call_id = str_field(block, "tool_use_id").map(String::from);
    if block.get("is_error").and_then(Value::as_bool) == Some(true) {
        response.error = Some(content);
    }
    response
}

fn model_name(request: &Value, response: &Value) -> Option<String> {
    str_field(response, "model").or_else(|| str_field(request, "model")).map(String::from)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn copy_field(source: &Value, key: &str, target: &mut Map<String, Value>) {
    if let Some(value) = source.get(key).filter(|v| !v.is_null()) {
        target.insert(key.to_string(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_request() -> Value {
        json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are a calculator."},
                {"role": "user", "content": "What's 25 + 17?"}
            ]
        })
    }

    #[test]
    fn test_openai_tool_decision() {
        let response = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\": \"25 + 17\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 12, "total_tokens": 62}
        });

        let exchange = NormalizerChain::default().normalize(&openai_request(), &response);

        assert_eq!(exchange.kind, RecordKind::ToolDecision);
        assert_eq!(exchange.model_name.as_deref(), Some("gpt-4o-mini-2024-07-18"));
        assert_eq!(exchange.provider.as_deref(), Some("openai"));
        assert_eq!(exchange.response_text, "Decided to call tool: calculator(expression=25 + 17)");
        assert_eq!(exchange.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(exchange.input["system"], json!("You are a calculator."));
        assert_eq!(exchange.input["prompt"], json!("What's 25 + 17?"));
        assert_eq!(exchange.token_usage.unwrap().total_tokens, Some(62));
        assert_eq!(exchange.metadata["normalizer"], json!("openai_chat"));
        assert_eq!(exchange.metadata["finish_reason"], json!("tool_calls"));
    }

    #[test]
    fn test_openai_answer_after_tool_result_is_final() {
        let request = json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "user", "content": "What's 25 + 17?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "function": {"name": "calculator", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "42"}
            ]
        });
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "The answer is 42."}}],
            "usage": {"prompt_tokens": 70, "completion_tokens": 8}
        });

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::FinalResponse);
        assert_eq!(exchange.response_text, "The answer is 42.");
        assert_eq!(exchange.tool_responses[0].call_id.as_deref(), Some("call_1"));
        assert_eq!(exchange.tool_responses[0].content, "42");
        assert_eq!(exchange.model_name.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(exchange.token_usage.unwrap().total_tokens, Some(78));
    }

    #[test]
    fn test_openai_empty_choices_degrade_to_generic() {
        let response = json!({"choices": [], "model": "gpt-4o"});
        let exchange = NormalizerChain::default().normalize(&openai_request(), &response);

        assert_eq!(exchange.kind, RecordKind::LlmCall);
        assert_eq!(exchange.metadata["normalizer"], json!("generic"));
        assert_eq!(exchange.model_name.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_anthropic_tool_use_and_usage_names() {
        let request = json!({
            "model": "claude-3-5-sonnet-latest",
            "system": "Be brief.",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Weather in Paris?"}]}]
        });
        let response = json!({
            "id": "msg_1",
            "type": "message",
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Paris"}}
            ],
            "usage": {"input_tokens": 30, "output_tokens": 20}
        });

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::ToolDecision);
        assert_eq!(exchange.provider.as_deref(), Some("anthropic"));
        assert_eq!(exchange.response_text, "Let me check.\n\nTool calls: weather(city=Paris)");
        assert_eq!(exchange.input["system"], json!("Be brief."));
        assert_eq!(exchange.input["prompt"], json!("Weather in Paris?"));

        let usage = exchange.token_usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(30));
        assert_eq!(usage.completion_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(50));
    }

    #[test]
    fn test_anthropic_tool_result_in_request() {
        let request = json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C and sunny"}
            ]}]
        });
        let response = json!({
            "type": "message",
            "content": [{"type": "text", "text": "It is 18C and sunny."}],
            "usage": {"input_tokens": 40}
        });

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::FinalResponse);
        assert_eq!(exchange.tool_responses[0].call_id.as_deref(), Some("toolu_1"));
        assert!(!exchange.input.contains_key("prompt"));
        assert_eq!(exchange.token_usage.unwrap().total_tokens, None);
    }

    #[test]
    fn test_langchain_flat_prompt_and_tool_calls() {
        let request = json!({
            "serialized": {"id": ["langchain", "chat_models", "openai", "ChatOpenAI"]},
            "prompts": ["System: You are helpful.\nHuman: Add 2 and 3\nplease"],
            "tags": ["demo"]
        });
        let response = json!({
            "generations": [[{
                "text": "",
                "message": {
                    "content": "",
                    "tool_calls": [
                        {"name": "add", "args": {"a": 2, "b": 3}, "id": "call_a"},
                        {"name": "log", "args": {}, "id": "call_b"}
                    ]
                }
            }]],
            "llm_output": {"token_usage": {"prompt_tokens": 15, "completion_tokens": 9, "total_tokens": 24}}
        });

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::ToolDecision);
        assert_eq!(exchange.provider.as_deref(), Some("langchain"));
        assert_eq!(exchange.model_name, None);
        assert_eq!(exchange.input["system"], json!("You are helpful."));
        assert_eq!(exchange.input["prompt"], json!("Add 2 and 3\nplease"));
        assert_eq!(exchange.response_text, "Decided to call tools: add(a=2, b=3), log()");
        assert_eq!(exchange.token_usage.unwrap().total_tokens, Some(24));
        assert_eq!(exchange.metadata["langchain_tags"], json!(["demo"]));
        assert_eq!(exchange.metadata["langchain_streaming"], json!(false));
    }

    #[test]
    fn test_langchain_model_name_and_generation_usage() {
        let request = json!({
            "serialized": {"kwargs": {"model_name": "gpt-4o"}},
            "prompts": ["Human: hi\nTool: 42"]
        });
        let response = json!({
            "generations": [[{
                "text": "The tool said 42.",
                "generation_info": {"usage": {"input_tokens": 5, "output_tokens": 6}}
            }]],
            "llm_output": null
        });

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::FinalResponse);
        assert_eq!(exchange.model_name.as_deref(), Some("gpt-4o"));
        assert_eq!(exchange.tool_responses[0].content, "42");
        assert_eq!(exchange.token_usage.unwrap().total_tokens, Some(11));
        assert_eq!(exchange.metadata["langchain_streaming"], json!(true));
    }

    #[test]
    fn test_generic_unknown_shape() {
        let request = json!({"model": "llama3.2", "prompt": "Why is the sky blue?"});
        let response = json!({"response": "Rayleigh scattering.", "usage": {"prompt_tokens": 7}});

        let exchange = NormalizerChain::default().normalize(&request, &response);

        assert_eq!(exchange.kind, RecordKind::LlmCall);
        assert_eq!(exchange.response_text, "Rayleigh scattering.");
        assert_eq!(exchange.input["prompt"], json!("Why is the sky blue?"));
        assert_eq!(exchange.token_usage.unwrap().prompt_tokens, Some(7));
        assert_eq!(exchange.metadata["normalizer"], json!("generic"));
    }

    struct FailingNormalizer;

    impl ResponseNormalizer for FailingNormalizer {
        fn name(&self) -> &str {
            "failing"
        }

        fn matches(&self, _request: &Value, _response: &Value) -> bool {
            true
        }

        fn normalize(&self, _request: &Value, _response: &Value) -> Result<NormalizedExchange> {
            Err(BreadcrumbsError::NormalizationError("always".to_string()))
        }
    }

    #[test]
    fn test_custom_normalizer_runs_first_and_falls_through() {
        let chain = NormalizerChain::default().with_normalizer(FailingNormalizer);
        assert_eq!(chain.names()[0], "failing");

        let exchange = chain.normalize(&json!({}), &json!("plain text"));
        assert_eq!(exchange.response_text, "plain text");
        assert_eq!(exchange.metadata["normalizer"], json!("generic"));
    }

    #[test]
    fn test_describe_decision() {
        let call = ToolCall::new("search", parse_arguments(&json!("{\"q\": \"rust\"}")));
        assert_eq!(describe_decision("", &[call.clone()]), "Decided to call tool: search(q=rust)");
        assert_eq!(describe_decision("Sure.", &[call]), "Sure.\n\nTool calls: search(q=rust)");
        assert_eq!(describe_decision("Plain", &[]), "Plain");
    }

    #[test]
    fn test_parse_arguments_wraps_non_objects() {
        assert_eq!(parse_arguments(&json!("not json")), {
            let mut map = Map::new();
            map.insert("input".to_string(), json!("not json"));
            map
        });
        assert!(parse_arguments(&json!(null)).is_empty());
        assert_eq!(parse_arguments(&json!({"k": 1}))["k"], json!(1));
    }

    #[test]
    fn test_normalize_usage_variants() {
        assert_eq!(normalize_usage(&json!({})), None);
        assert_eq!(normalize_usage(&json!("nope")), None);

        let usage = normalize_usage(&json!({"prompt_tokens": null, "input_tokens": 3, "output_tokens": 4.0})).unwrap();
        assert_eq!(usage.prompt_tokens, Some(3));
        assert_eq!(usage.completion_tokens, Some(4));
        assert_eq!(usage.total_tokens, Some(7));
    }
}
