//! # agent-breadcrumbs
//!
//! Follow the trail of your AI agents. Every model call, tool run and reasoning step
//! becomes a [`TraceRecord`](models::TraceRecord) with token usage, cost and timing,
//! buffered in memory and flushed to CSV, JSON or JSON Lines.
//!
//! ```rust,ignore
//! use agent_breadcrumbs::prelude::*;
//!
//! let tracer = TraceCollector::quick_logger("agent_traces.csv")?;
//! tracer.log_llm_call(LlmCallEntry::new("ping", "pong").with_model("gpt-4o-mini").with_tokens(10, 5));
//! tracer.close()?;
//! ```

pub mod clients;
pub mod config;
pub mod cost;
pub mod error;
pub mod models;
pub mod storage;
pub mod tracer;

pub use error::{BreadcrumbsError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::clients::{AnthropicClient, CompletionClient, OpenAiClient, TracedClient};
    pub use crate::config::TracerConfig;
    pub use crate::cost::calculate_cost;
    pub use crate::error::{BreadcrumbsError, Result};
    pub use crate::models::{RecordKind, TokenUsage, ToolCall, ToolResponse, TraceRecord};
    pub use crate::storage::{BufferedStore, OutputFormat, RecordQuery, StoreOptions};
    pub use crate::tracer::{
        enable, CallbackHandler, LifecycleHook, LlmCallEntry, ToolUseEntry, TraceCollector,
    };
}
