//! Traced OpenAI client example.
//!
//! Wraps the OpenAI chat completions client so every successful call is recorded with
//! its real duration, token usage and cost.
//!
//! # Running the example
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --example traced_openai
//! ```

use agent_breadcrumbs::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = TracerConfig::from_env()?
        .with_output_file("openai_traces.jsonl")
        .with_output_format(OutputFormat::JsonLines)
        .with_redaction(None);
    let tracer = enable(config)?;

    let client = TracedClient::new(OpenAiClient::new()?, tracer.clone());

    let request = json!({
        "model": "gpt-4o-mini",
        "messages": [
            {"role": "system", "content": "Answer in one sentence."},
            {"role": "user", "content": "Why do agents need observability?"}
        ]
    });

    match client.complete(&request).await {
        Ok(response) => {
            let content = response["choices"][0]["message"]["content"].as_str().unwrap_or_default();
            println!("Response: {}", content);
        }
        Err(err) => eprintln!("Request failed: {}", err),
    }

    for record in tracer.session_history(None)? {
        println!("{}", record.printable_summary());
    }

    tracer.close()?;
    Ok(())
}
