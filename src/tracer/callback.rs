//! Lifecycle hooks for frameworks that report calls as start/finish events.

use super::trace_collector::{TraceCollector, ToolUseEntry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Start/finish notifications for model calls and tool runs, keyed by a run id the
/// caller picks
pub trait LifecycleHook: Send + Sync {
    fn call_started(&self, run_id: &str, request: &Value);

    /// Returns the id of the record written, if any
    fn call_finished(&self, run_id: &str, response: &Value) -> Option<String>;

    fn call_failed(&self, run_id: &str, error: &str);

    fn tool_started(&self, run_id: &str, tool_name: &str, input: &str);

    /// Returns the id of the record written, if any
    fn tool_finished(&self, run_id: &str, output: &str) -> Option<String>;
}

enum PendingRun {
    Call {
        request: Value,
        started: Instant,
    },
    Tool {
        tool_name: String,
        input: String,
        started: Instant,
    },
}

/// [`LifecycleHook`] that turns finished runs into trace records
pub struct CallbackHandler {
    collector: Arc<TraceCollector>,
    log_tools: bool,
    runs: Mutex<HashMap<String, PendingRun>>,
}

impl CallbackHandler {
    pub fn new(collector: Arc<TraceCollector>) -> Self {
        Self {
            collector,
            log_tools: true,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_log_tools(mut self, log_tools: bool) -> Self {
        self.log_tools = log_tools;
        self
    }

    pub fn collector(&self) -> &Arc<TraceCollector> {
        &self.collector
    }

    /// Runs started but not yet finished
    pub fn pending_runs(&self) -> usize {
        self.runs().len()
    }

    fn runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, run_id: &str) -> Option<PendingRun> {
        self.runs().remove(run_id)
    }
}

fn parse_tool_input(input: &str) -> Value {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str(input) {
            return parsed;
        }
    }
    Value::String(input.to_string())
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

impl LifecycleHook for CallbackHandler {
    fn call_started(&self, run_id: &str, request: &Value) {
        debug!(run_id, "Call started");
        self.runs().insert(
            run_id.to_string(),
            PendingRun::Call {
                request: request.clone(),
                started: Instant::now(),
            },
        );
    }

    fn call_finished(&self, run_id: &str, response: &Value) -> Option<String> {
        let (request, duration) = match self.take(run_id) {
            Some(PendingRun::Call { request, started }) => (request, Some(started.elapsed())),
            Some(PendingRun::Tool { .. }) | None => {
                warn!(run_id, "Call finished without a matching start, recording without duration");
                (Value::Null, None::<Duration>)
            }
        };

        let mut exchange = self.collector.normalizers().normalize(&request, response);
        exchange.metadata.insert("lifecycle_hook".to_string(), Value::Bool(true));
        let record = self.collector.exchange_record(exchange, &request, response, duration);
        self.collector.log_record(record)
    }

    fn call_failed(&self, run_id: &str, error: &str) {
        if self.take(run_id).is_none() {
            debug!(run_id, "Failure reported for an unknown run");
        }
        warn!(run_id, error, "Call failed, nothing recorded");
    }

    fn tool_started(&self, run_id: &str, tool_name: &str, input: &str) {
        if !self.log_tools {
            return;
        }
        debug!(run_id, tool_name, "Tool started");
        self.runs().insert(
            run_id.to_string(),
            PendingRun::Tool {
                tool_name: tool_name.to_string(),
                input: input.to_string(),
                started: Instant::now(),
            },
        );
    }

    fn tool_finished(&self, run_id: &str, output: &str) -> Option<String> {
        if !self.log_tools {
            return None;
        }

        let (tool_name, input, duration_ms) = match self.take(run_id) {
            Some(PendingRun::Tool {
                tool_name,
                input,
                started,
            }) => (tool_name, input, Some(elapsed_ms(started))),
            Some(PendingRun::Call { .. }) | None => {
                warn!(run_id, "Tool finished without a matching start, recording without duration");
                ("unknown_tool".to_string(), String::new(), None)
            }
        };

        let mut entry = ToolUseEntry::new(
            tool_name,
            json!({ "input": parse_tool_input(&input) }),
            json!({ "result": output }),
        )
        .with_call_id(run_id)
        .with_metadata("lifecycle_hook", true);
        entry.duration_ms = duration_ms;

        self.collector.log_tool_use(entry)
    }
}
