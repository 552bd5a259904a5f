//! HTTP completion clients and the tracing decorator that wraps them.
//!
//! Clients speak raw JSON: the request body goes out as is and the decoded response
//! body comes back. [`TracedClient`] wraps any [`CompletionClient`] and records every
//! successful exchange with its measured duration.

use crate::error::{BreadcrumbsError, Result};
use crate::tracer::TraceCollector;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that turns a request body into a response body
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &Value) -> Result<Value>;
}

/// Records every successful call of the wrapped client on a [`TraceCollector`].
///
/// Failed calls are logged and returned unchanged; they never produce a record.
pub struct TracedClient<C> {
    inner: C,
    collector: Arc<TraceCollector>,
}

impl<C: CompletionClient> TracedClient<C> {
    pub fn new(inner: C, collector: Arc<TraceCollector>) -> Self {
        Self { inner, collector }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn collector(&self) -> &Arc<TraceCollector> {
        &self.collector
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for TracedClient<C> {
    async fn complete(&self, request: &Value) -> Result<Value> {
        let started = Instant::now();
        match self.inner.complete(request).await {
            Ok(response) => {
                let elapsed = started.elapsed();
                self.collector.record_exchange(request, &response, Some(elapsed));
                Ok(response)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Completion failed, not recorded"
                );
                Err(err)
            }
        }
    }
}

fn build_http_client(timeout: Option<Duration>) -> Result<Client> {
    let mut client_builder = Client::builder();
    if let Some(timeout) = timeout {
        client_builder = client_builder.timeout(timeout);
    }
    Ok(client_builder.build()?)
}

async fn decode_response(provider: &str, response: reqwest::Response) -> Result<Value> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(BreadcrumbsError::ApiError(format!(
            "{} API error: {} - {}",
            provider, status, error_text
        )));
    }
    Ok(response.json().await?)
}

/// Configuration for connecting to the OpenAI API
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<Duration>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_API_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            timeout: None,
        }
    }
}

/// Chat completions client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new() -> Result<Self> {
        Self::with_config(OpenAiConfig::default())
    }

    pub fn with_config(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            config,
        })
    }

    pub fn with_api_key_and_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(OpenAiConfig {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &Value) -> Result<Value> {
        debug!(base_url = %self.config.base_url, "Sending OpenAI chat completion");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        decode_response("OpenAI", response).await
    }
}

/// Configuration for connecting to the Anthropic API
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout: Option<Duration>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            base_url: std::env::var("ANTHROPIC_API_ENDPOINT")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string()),
            api_version: "2023-06-01".to_string(),
            timeout: None,
        }
    }
}

/// Messages API client
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new() -> Result<Self> {
        Self::with_config(AnthropicConfig::default())
    }

    pub fn with_config(config: AnthropicConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            config,
        })
    }

    pub fn with_api_key_and_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(AnthropicConfig {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, request: &Value) -> Result<Value> {
        debug!(base_url = %self.config.base_url, "Sending Anthropic message");
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        decode_response("Anthropic", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TracerConfig;
    use crate::models::RecordKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn collector(dir: &TempDir) -> Arc<TraceCollector> {
        let config = TracerConfig::for_file(dir.path().join("client.jsonl")).unwrap();
        Arc::new(TraceCollector::new(config).unwrap())
    }

    struct SlowClient;

    #[async_trait]
    impl CompletionClient for SlowClient {
        async fn complete(&self, _request: &Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_millis(25)).await;
            Ok(json!({"text": "done"}))
        }
    }

    #[tokio::test]
    async fn test_openai_client_sends_bearer_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::with_api_key_and_base_url("test-key", server.url()).unwrap();
        let response = client.complete(&json!({"model": "gpt-4o-mini", "messages": []})).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response["choices"][0]["message"]["content"], json!("Hello!"));
    }

    #[tokio::test]
    async fn test_anthropic_client_sends_key_and_version() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_body(r#"{"type":"message","content":[{"type":"text","text":"Hi"}],"stop_reason":"end_turn"}"#)
            .create_async()
            .await;

        let client = AnthropicClient::with_api_key_and_base_url("test-key", server.url()).unwrap();
        let response = client.complete(&json!({"model": "claude-3-5-haiku"})).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response["content"][0]["text"], json!("Hi"));
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let client = OpenAiClient::with_api_key_and_base_url("bad-key", server.url()).unwrap();
        let result = client.complete(&json!({})).await;

        mock.assert_async().await;
        match result {
            Err(BreadcrumbsError::ApiError(message)) => assert!(message.contains("401")),
            other => panic!("Expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_traced_client_records_tool_decision() {
        let temp_dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"get_weather","arguments":"{\"location\": \"NYC\"}"}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":20,"completion_tokens":8,"total_tokens":28}}"#,
            )
            .create_async()
            .await;

        let inner = OpenAiClient::with_api_key_and_base_url("test-key", server.url()).unwrap();
        let traced = TracedClient::new(inner, collector(&temp_dir));
        let request = json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "Weather in NYC?"}]
        });

        traced.complete(&request).await.unwrap();

        let records = traced.collector().all_records().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, RecordKind::ToolDecision);
        assert_eq!(record.tool_calls[0].name, "get_weather");
        assert_eq!(record.response_text(), Some("Decided to call tool: get_weather(location=NYC)"));
        assert_eq!(record.total_tokens(), Some(28));
        assert!(record.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_traced_client_does_not_record_failures() {
        let temp_dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let inner = OpenAiClient::with_api_key_and_base_url("test-key", server.url()).unwrap();
        let traced = TracedClient::new(inner, collector(&temp_dir));

        assert!(traced.complete(&json!({"model": "gpt-4o-mini"})).await.is_err());
        assert!(traced.collector().all_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traced_client_measures_duration() {
        let temp_dir = TempDir::new().unwrap();
        let traced = TracedClient::new(SlowClient, collector(&temp_dir));

        traced.complete(&json!({"prompt": "wait"})).await.unwrap();

        let record = &traced.collector().all_records().unwrap()[0];
        assert!(record.duration_ms.unwrap() >= 25.0);
        assert_eq!(record.user_input(), Some("wait"));
        assert_eq!(record.response_text(), Some("done"));
    }
}
