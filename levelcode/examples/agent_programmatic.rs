//! A programmatic step function interleaving deterministic tool calls with
//! LLM turns.
//!
//! ```bash
//! cargo run --example agent_programmatic
//! ```

use std::sync::Arc;

use levelcode::client::mock::{FileMapClientTools, MockLlm};
use levelcode::generator::StepHandle;
use levelcode::prelude::*;
use levelcode::stream::LlmChunk;
use serde_json::json;

#[tokio::main]
async fn main() -> levelcode::Result<()> {
    tracing_subscriber::fmt().init();

    // The generator reads a file first, then hands the turn to the model.
    let program = StepProgram::native(|mut handle: StepHandle| async move {
        let contents = handle
            .invoke_tool("read_files", json!({ "paths": ["notes.txt"] }))
            .await?;
        tracing::info!(?contents, "read before the first model step");
        handle.step_all().await?;
        Ok(())
    });

    let template = AgentTemplate::builder("note-reader", "mock-model")
        .system_prompt("Summarize the user's notes.")
        .tools(["read_files", "end_turn"])
        .handle_steps(program)
        .build()?;

    let llm = Arc::new(MockLlm::streaming([vec![
        LlmChunk::text("Your notes say: buy more coffee."),
        LlmChunk::ToolCall(ToolCall::new("tc-1", "end_turn", json!({}))),
    ]]));
    let files = Arc::new(FileMapClientTools::new([(
        "notes.txt".to_owned(),
        "buy more coffee".to_owned(),
    )]));

    let env = RunEnv::builder(llm)
        .agents(AgentRegistry::with_bundled([template]))
        .client_tools(files)
        .build();

    let outcome = run_agent(&env, "note-reader", "What do my notes say?", CancellationSignal::new())
        .await?;

    println!("status: {}, steps: {}", outcome.status, outcome.steps_taken);
    Ok(())
}
