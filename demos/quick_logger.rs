//! Quick logger example.
//!
//! Logs a short agent interaction through the explicit API, then reads the session
//! back and prints the trace summary.
//!
//! # Running the example
//!
//! ```bash
//! RUST_LOG=agent_breadcrumbs=debug cargo run --example quick_logger
//! ```

use agent_breadcrumbs::prelude::*;
use serde_json::{json, Map};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tracer = TraceCollector::quick_logger("quick_traces.csv")?;

    tracer.log_reasoning(
        "The user asked about the weather, I need live data",
        "call the weather tool",
        Map::new(),
    );

    let mut arguments = Map::new();
    arguments.insert("city".to_string(), json!("Oslo"));
    tracer.log_llm_call(
        LlmCallEntry::new("What's the weather in Oslo?", "")
            .with_system_prompt("You are a helpful assistant.")
            .with_model("gpt-4o-mini")
            .with_tokens(42, 12)
            .with_duration_ms(380.0)
            .with_tool_calls(vec![ToolCall::new("get_weather", arguments).with_id("call_1")]),
    );

    tracer.log_tool_use(
        ToolUseEntry::new("get_weather", json!({"city": "Oslo"}), json!({"temp_c": 4}))
            .with_call_id("call_1")
            .with_duration_ms(95.0),
    );

    tracer.log_llm_call(
        LlmCallEntry::new("What's the weather in Oslo?", "It is 4°C in Oslo right now.")
            .with_model("gpt-4o-mini")
            .with_tokens(61, 14)
            .with_duration_ms(410.0)
            .with_tool_responses(vec![ToolResponse::new("get_weather", "{\"temp_c\":4}").with_call_id("call_1")]),
    );

    println!("Session {}", tracer.session_id());
    println!();
    for record in tracer.session_history(None)? {
        println!("{}", record.printable_summary());
    }

    println!();
    println!("{}", tracer.stats()?);

    tracer.close()?;
    Ok(())
}
