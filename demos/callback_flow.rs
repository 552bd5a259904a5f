//! Lifecycle hook example.
//!
//! Feeds a callback handler the start/finish events a framework would emit for a
//! tool-using agent run, then exports the traces as JSON.
//!
//! # Running the example
//!
//! ```bash
//! cargo run --example callback_flow
//! ```

use agent_breadcrumbs::prelude::*;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tracer = Arc::new(TraceCollector::new(TracerConfig::for_file("callback_traces.csv")?)?);
    let handler = CallbackHandler::new(tracer.clone());

    handler.call_started(
        "run-1",
        &json!({
            "serialized": {"kwargs": {"model_name": "gpt-4o-mini"}},
            "prompts": ["System: You can use tools.\nHuman: What is 17 * 23?"]
        }),
    );
    handler.call_finished(
        "run-1",
        &json!({
            "generations": [[{
                "text": "",
                "message": {"tool_calls": [{"id": "call_1", "name": "multiply", "args": {"a": 17, "b": 23}}]}
            }]],
            "llm_output": {"model_name": "gpt-4o-mini", "token_usage": {"prompt_tokens": 55, "completion_tokens": 18}}
        }),
    );

    handler.tool_started("run-2", "multiply", r#"{"a": 17, "b": 23}"#);
    handler.tool_finished("run-2", "391");

    handler.call_started(
        "run-3",
        &json!({
            "serialized": {"kwargs": {"model_name": "gpt-4o-mini"}},
            "prompts": ["Human: What is 17 * 23?\nTool: 391"]
        }),
    );
    handler.call_finished(
        "run-3",
        &json!({
            "generations": [[{"text": "17 * 23 = 391"}]],
            "llm_output": {"model_name": "gpt-4o-mini", "token_usage": {"prompt_tokens": 80, "completion_tokens": 9}}
        }),
    );

    for record in tracer.session_history(None)? {
        println!("{}", record.printable_summary());
    }

    let exported = tracer.export("json", Some(Path::new("callback_traces_export.json")))?;
    println!("Exported to {}", exported.display());

    tracer.close()?;
    Ok(())
}
