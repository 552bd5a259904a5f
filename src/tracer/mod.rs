//! Trace collection for LLM agents
//!
//! The tracer turns agent activity into [`TraceRecord`](crate::models::TraceRecord)s and
//! hands them to a buffered store. Records arrive three ways:
//!
//! - **Explicit calls**: [`TraceCollector::log_llm_call`], [`TraceCollector::log_tool_use`]
//!   and [`TraceCollector::log_reasoning`]
//! - **Lifecycle hooks**: a [`CallbackHandler`] fed start/finish events by a framework
//! - **Wrapped clients**: [`TracedClient`](crate::clients::TracedClient), which records
//!   every successful request/response pair
//!
//! Intercepted pairs go through a [`NormalizerChain`] that recognizes OpenAI chat
//! completions, Anthropic messages and LangChain results, and falls back to a generic
//! reading of anything else.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use agent_breadcrumbs::tracer::{LlmCallEntry, TraceCollector};
//!
//! let tracer = TraceCollector::quick_logger("agent_traces.csv")?;
//!
//! tracer.log_llm_call(
//!     LlmCallEntry::new("What is 2+2?", "4")
//!         .with_model("gpt-4o-mini")
//!         .with_tokens(12, 1),
//! );
//!
//! for record in tracer.session_history(None)? {
//!     println!("{}", record.printable_summary());
//! }
//! ```
//!
//! # Sessions
//!
//! Every record carries the collector's current session id. Start a new session per
//! conversation with [`TraceCollector::start_new_session`] to group records on the
//! read side.

pub mod callback;
pub mod normalizers;
pub mod redaction;
pub mod trace_collector;

pub use callback::{CallbackHandler, LifecycleHook};
pub use normalizers::{
    AnthropicMessagesNormalizer, GenericNormalizer, LangChainResultNormalizer,
    NormalizedExchange, NormalizerChain, OpenAiChatNormalizer, ResponseNormalizer,
};
pub use redaction::{Redactor, REDACTED};
pub use trace_collector::{enable, LlmCallEntry, ToolUseEntry, TraceCollector, TracerStats};
