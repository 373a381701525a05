//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use levelcode::client::mock::{
    CollectingEvents, MockLlm, MockResponse, RecordingRecorder,
};
use levelcode::client::{ClientToolDelegate, LlmClient};
use levelcode::env::{RunEnv, RuntimeConfig};
use levelcode::message::{ContentPart, Message};
use levelcode::prelude::*;
use levelcode::stream::LlmChunk;
use serde_json::{Value, json};

/// Everything a scenario needs, with handles kept typed for assertions.
pub struct TestBed {
    pub llm: Arc<MockLlm>,
    pub events: Arc<CollectingEvents>,
    pub recorder: Arc<RecordingRecorder>,
    pub env: Arc<RunEnv>,
}

/// A bed with default config (children run one at a time so mock scripts
/// stay deterministic).
pub fn bed(templates: Vec<AgentTemplate>, responses: Vec<MockResponse>) -> TestBed {
    bed_with(templates, responses, None, None)
}

/// A bed with an optional client delegate and tool registry override.
pub fn bed_with(
    templates: Vec<AgentTemplate>,
    responses: Vec<MockResponse>,
    client_tools: Option<Arc<dyn ClientToolDelegate>>,
    tools: Option<ToolRegistry>,
) -> TestBed {
    let llm = Arc::new(MockLlm::new(responses));
    let events = Arc::new(CollectingEvents::new());
    let recorder = Arc::new(RecordingRecorder::new());

    let client: Arc<dyn LlmClient> = Arc::clone(&llm) as Arc<dyn LlmClient>;
    let mut builder = RunEnv::builder(client)
        .agents(AgentRegistry::with_bundled(templates))
        .events(Arc::clone(&events) as Arc<dyn EventSink>)
        .recorder(Arc::clone(&recorder) as Arc<dyn RunRecorder>)
        .config(RuntimeConfig::default().with_spawn_fan_out(1));
    if let Some(delegate) = client_tools {
        builder = builder.client_tools(delegate);
    }
    if let Some(tools) = tools {
        builder = builder.tools(tools);
    }

    TestBed {
        llm,
        events,
        recorder,
        env: builder.build(),
    }
}

/// A streaming scripted response.
pub fn stream(chunks: Vec<LlmChunk>) -> MockResponse {
    MockResponse::Stream(chunks)
}

/// A structured tool-call chunk.
pub fn call(id: &str, name: &str, input: Value) -> LlmChunk {
    LlmChunk::ToolCall(ToolCall::new(id, name, input))
}

/// An `end_turn` tool-call chunk.
pub fn end_turn(id: &str) -> LlmChunk {
    call(id, "end_turn", json!({}))
}

/// Role/kind fingerprint of a history, for shape comparisons.
pub fn history_shape(history: &[Message]) -> Vec<String> {
    history
        .iter()
        .map(|message| {
            let kind = match message.content.first() {
                Some(ContentPart::Text { .. }) | None => "text",
                Some(ContentPart::ToolCall { .. }) => "tool_call",
                Some(ContentPart::ToolResult { .. }) => "tool_result",
            };
            format!("{}:{kind}", message.role.as_str())
        })
        .collect()
}

/// Asserts the pairing invariant: every assistant tool-call part has exactly
/// one later tool message with the matching id, and every tool message
/// answers exactly one earlier call.
pub fn assert_pairing(history: &[Message]) {
    let mut call_ids = Vec::new();
    let mut result_ids = Vec::new();
    for (index, message) in history.iter().enumerate() {
        for part in &message.content {
            match part {
                ContentPart::ToolCall { call } => {
                    call_ids.push((index, call.tool_call_id.clone()));
                }
                ContentPart::ToolResult { tool_call_id, .. } => {
                    result_ids.push((index, tool_call_id.clone()));
                }
                ContentPart::Text { .. } => {}
            }
        }
    }
    for (call_index, id) in &call_ids {
        let matching: Vec<_> = result_ids
            .iter()
            .filter(|(result_index, result_id)| result_id == id && result_index > call_index)
            .collect();
        assert_eq!(
            matching.len(),
            1,
            "tool call {id} expects exactly one later result, found {}",
            matching.len()
        );
    }
    for (_, id) in &result_ids {
        assert_eq!(
            call_ids.iter().filter(|(_, call_id)| call_id == id).count(),
            1,
            "tool result {id} must answer exactly one call"
        );
    }
}

/// Text of every user message, in order.
pub fn user_texts(history: &[Message]) -> Vec<String> {
    history
        .iter()
        .filter(|message| message.role == Role::User)
        .filter_map(Message::text_content)
        .collect()
}
