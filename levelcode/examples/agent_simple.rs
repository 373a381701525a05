//! Minimal agent run against the scripted mock client.
//!
//! ```bash
//! cargo run --example agent_simple
//! ```

use std::sync::Arc;

use levelcode::client::mock::MockLlm;
use levelcode::prelude::*;
use levelcode::stream::LlmChunk;
use serde_json::json;

#[tokio::main]
async fn main() -> levelcode::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let template = AgentTemplate::builder("greeter", "mock-model")
        .display_name("Greeter")
        .system_prompt("You greet people warmly and then stop.")
        .tools(["end_turn"])
        .build()?;

    // A real deployment passes its provider client here; the mock plays
    // back one scripted streaming response.
    let llm = Arc::new(MockLlm::streaming([vec![
        LlmChunk::text("Hello! Lovely to meet you."),
        LlmChunk::ToolCall(ToolCall::new("tc-1", "end_turn", json!({}))),
    ]]));

    let env = RunEnv::builder(llm)
        .agents(AgentRegistry::with_bundled([template]))
        .build();

    let outcome = run_agent(&env, "greeter", "Say hi!", CancellationSignal::new()).await?;

    println!("status: {}", outcome.status);
    if let RunOutput::LastMessage { text } = &outcome.output {
        println!("agent said: {text}");
    }
    Ok(())
}
