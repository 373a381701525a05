//! Loop controller scenarios: turn ending, output validation, invalid tool
//! input, budgets, credits, and cancellation.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use levelcode::agent::runner::{
    BUDGET_EXCEEDED_MESSAGE, CANCELLED_MESSAGE, OUTPUT_RETRY_MESSAGE,
};
use levelcode::client::Usage;
use levelcode::client::mock::MockResponse;
use levelcode::error::ToolError;
use levelcode::message::ToolResultPart;
use levelcode::prelude::*;
use levelcode::stream::{EMBEDDED_ID_PREFIX, LlmChunk, embed_tool_call};
use levelcode::tools;
use serde_json::{Value, json};

fn base_template() -> AgentTemplate {
    AgentTemplate::builder("base-agent", "mock-model")
        .system_prompt("You are a careful coding agent.")
        .tools(["end_turn", "set_output", "spawn_agents"])
        .build()
        .expect("template builds")
}

#[tokio::test]
async fn simple_end_turn() {
    let bed = bed(
        vec![base_template()],
        vec![stream(vec![
            LlmChunk::text("Hello"),
            end_turn("tc-1"),
        ])],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Say hello", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(outcome.steps_taken, 1);
    assert_eq!(bed.llm.call_count(), 1);
    assert_eq!(
        outcome.output,
        RunOutput::LastMessage {
            text: "Hello".to_owned()
        }
    );

    let history = &outcome.state.message_history;
    assert_pairing(history);
    let shape = history_shape(history);
    assert_eq!(
        shape,
        [
            "system:text",
            "user:text",
            "assistant:text",
            "assistant:tool_call",
            "tool:tool_result",
        ]
    );

    // The caller's stream saw the same order: text, then the call, then its
    // result.
    let payload_kinds: Vec<&str> = bed
        .events
        .snapshot()
        .iter()
        .map(|event| match &event.payload {
            EventPayload::Text { .. } => "text",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            _ => "other",
        })
        .collect();
    assert_eq!(payload_kinds, ["text", "tool_call", "tool_result"]);
}

#[tokio::test]
async fn output_schema_injects_single_corrective_retry() {
    let template = AgentTemplate::builder("structured-agent", "mock-model")
        .system_prompt("Produce structured output.")
        .tools(["end_turn", "set_output"])
        .output_schema(Schema::new(json!({
            "type": "object",
            "properties": { "result": { "type": "string" } },
            "required": ["result"]
        })))
        .output_mode(OutputMode::StructuredOutput)
        .build()
        .expect("template builds");

    let bed = bed(
        vec![template],
        vec![
            // Ends the turn without ever calling set_output.
            stream(vec![LlmChunk::text("forgot the output")]),
            // Second chance: records output, then ends the turn.
            stream(vec![
                call("tc-1", "set_output", json!({ "result": "done" })),
                end_turn("tc-2"),
            ]),
        ],
    );

    let outcome = run_agent(
        &bed.env,
        "structured-agent",
        "Do the thing",
        CancellationSignal::new(),
    )
    .await
    .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(
        outcome.output,
        RunOutput::StructuredOutput {
            output: json!({ "result": "done" })
        }
    );
    assert_eq!(bed.llm.call_count(), 2);

    let correctives: Vec<_> = user_texts(&outcome.state.message_history)
        .into_iter()
        .filter(|text| text == OUTPUT_RETRY_MESSAGE)
        .collect();
    assert_eq!(correctives.len(), 1, "corrective message appears once");
}

#[tokio::test]
async fn invalid_tool_input_records_neither_call_nor_result() {
    let bed = bed(
        vec![base_template()],
        vec![
            stream(vec![call(
                "tc-1",
                "spawn_agents",
                json!({ "agents": "not an array" }),
            )]),
            stream(vec![end_turn("tc-2")]),
        ],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Spawn badly", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    let history = &outcome.state.message_history;
    assert_pairing(history);

    // No assistant tool-call part and no tool result for the rejected call.
    assert!(
        history.iter().all(|message| {
            message
                .content
                .iter()
                .all(|part| part.as_tool_call().is_none_or(|c| c.tool_name != "spawn_agents"))
        }),
        "rejected call must not be recorded"
    );
    assert!(
        user_texts(history)
            .iter()
            .any(|text| text.contains("Invalid parameters for spawn_agents")),
        "user-visible error message is injected"
    );
    // The loop continued to a second step.
    assert_eq!(bed.llm.call_count(), 2);
}

#[tokio::test]
async fn unknown_tool_injects_error_and_continues() {
    let bed = bed(
        vec![base_template()],
        vec![
            stream(vec![call("tc-1", "warp_drive", json!({}))]),
            stream(vec![end_turn("tc-2")]),
        ],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Engage", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert!(
        user_texts(&outcome.state.message_history)
            .iter()
            .any(|text| text.contains("Error during tool call: no such tool")),
    );
}

#[tokio::test]
async fn embedded_tool_call_ends_turn() {
    let text = format!("Wrapping up. {}", embed_tool_call("end_turn", &json!({})));
    let bed = bed(
        vec![base_template()],
        vec![stream(vec![LlmChunk::text(text)])],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Finish", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    let minted = outcome
        .state
        .message_history
        .iter()
        .flat_map(|message| message.content.iter())
        .find_map(|part| part.as_tool_call())
        .expect("embedded call recorded");
    assert!(minted.tool_call_id.starts_with(EMBEDDED_ID_PREFIX));
}

#[tokio::test]
async fn budget_exhaustion_fails_the_run() {
    let template = base_template();
    let bed = bed(
        vec![template.clone()],
        vec![
            stream(vec![call("tc-1", "set_output", json!({ "n": 1 }))]),
            stream(vec![call("tc-2", "set_output", json!({ "n": 2 }))]),
        ],
    );

    let state = AgentState::new("base-agent", 2);
    let outcome = loop_agent_steps(
        Arc::clone(&bed.env),
        Arc::new(template),
        state,
        Some("loop forever".to_owned()),
        None,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert_eq!(
        outcome.output.error_message(),
        Some(BUDGET_EXCEEDED_MESSAGE)
    );
    assert_eq!(bed.llm.call_count(), 2);
    assert!(
        user_texts(&outcome.state.message_history)
            .last()
            .is_some_and(|text| text.contains(BUDGET_EXCEEDED_MESSAGE)),
    );
    assert_eq!(
        bed.recorder.finished(),
        vec![(outcome.state.run_id.clone(), TerminalStatus::Failed)]
    );
}

#[tokio::test]
async fn usage_is_charged_as_credits() {
    let bed = bed(
        vec![base_template()],
        vec![stream(vec![
            LlmChunk::text("Hi"),
            LlmChunk::Done {
                aborted: false,
                message_id: Some("msg-1".to_owned()),
                usage: Some(Usage::new(1000, 250)),
            },
        ])],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Hi", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(outcome.state.credits_used, Usage::new(1000, 250).credits());
}

#[tokio::test]
async fn pre_cancelled_signal_short_circuits() {
    let bed = bed(vec![base_template()], vec![]);
    let signal = CancellationSignal::new();
    signal.cancel();

    let outcome = run_agent(&bed.env, "base-agent", "never runs", signal)
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Cancelled);
    assert_eq!(outcome.output.error_message(), Some(CANCELLED_MESSAGE));
    assert_eq!(bed.llm.call_count(), 0);
    assert_eq!(
        bed.recorder.finished(),
        vec![(outcome.state.run_id.clone(), TerminalStatus::Cancelled)]
    );
}

/// A tool that trips the run's cancellation signal, standing in for a user
/// hitting stop mid-stream.
struct TripCancel;

#[async_trait]
impl ToolHandler for TripCancel {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("trip_cancel", "Trips the signal.", json!({ "type": "object" }))
    }

    async fn call(
        &self,
        _input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> std::result::Result<Vec<ToolResultPart>, ToolError> {
        ctx.signal.cancel();
        Ok(vec![ToolResultPart::text("tripped")])
    }
}

#[tokio::test]
async fn cancellation_mid_stream_stops_the_run() {
    let template = AgentTemplate::builder("cancelling-agent", "mock-model")
        .system_prompt("sys")
        .tools(["trip_cancel", "end_turn"])
        .build()
        .expect("template builds");

    let mut registry = tools::builtin_registry();
    registry.register(TripCancel);

    let bed = bed_with(
        vec![template],
        vec![stream(vec![
            LlmChunk::text("before "),
            call("tc-1", "trip_cancel", json!({})),
            LlmChunk::text("after"),
            end_turn("tc-2"),
        ])],
        None,
        Some(registry),
    );

    let outcome = run_agent(&bed.env, "cancelling-agent", "go", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Cancelled);
    assert_eq!(outcome.output.error_message(), Some(CANCELLED_MESSAGE));

    // Nothing after the tripping call reached the caller.
    let texts: Vec<String> = bed
        .events
        .snapshot()
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["before "]);
}

#[tokio::test]
async fn run_ends_with_failed_when_output_never_validates() {
    let template = AgentTemplate::builder("stubborn-agent", "mock-model")
        .system_prompt("sys")
        .tools(["end_turn", "set_output"])
        .output_schema(Schema::new(json!({
            "type": "object",
            "properties": { "result": { "type": "string" } },
            "required": ["result"]
        })))
        .output_mode(OutputMode::StructuredOutput)
        .build()
        .expect("template builds");

    // Never calls set_output; every step just ends the turn. The budget of
    // 2 allows exactly one corrective retry before the run finalizes.
    let bed = bed(
        vec![template.clone()],
        vec![
            stream(vec![LlmChunk::text("nope")]),
            stream(vec![LlmChunk::text("still nope")]),
        ],
    );

    let state = AgentState::new("stubborn-agent", 2);
    let outcome = loop_agent_steps(
        Arc::clone(&bed.env),
        Arc::new(template),
        state,
        Some("produce output".to_owned()),
        None,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.status, TerminalStatus::Failed);
    // The last output (never set) is preserved in shaped form.
    assert_eq!(
        outcome.output,
        RunOutput::StructuredOutput {
            output: Value::Null
        }
    );
    assert_eq!(bed.llm.call_count(), 2);
    let correctives = user_texts(&outcome.state.message_history)
        .into_iter()
        .filter(|text| text == OUTPUT_RETRY_MESSAGE)
        .count();
    assert_eq!(correctives, 1);
}

#[tokio::test]
async fn llm_failure_is_a_failed_run() {
    let bed = bed(
        vec![base_template()],
        vec![MockResponse::Failure(levelcode::LlmError::Status {
            status: 400,
            message: "bad request".to_owned(),
        })],
    );

    let outcome = run_agent(&bed.env, "base-agent", "Hi", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.output.is_error());
}
