//! Scripted in-process collaborators.
//!
//! [`MockLlm`] plays back a queue of scripted responses, one per LLM call,
//! and records every request it sees. The `Null*` types are the inert
//! defaults used by [`RunEnvBuilder`](crate::env::RunEnvBuilder) when a
//! collaborator is not attached.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::cancel::CancellationSignal;
use crate::error::LlmError;
use crate::events::AgentEvent;
use crate::message::ToolResultPart;
use crate::schema::Schema;
use crate::stream::LlmChunk;
use crate::template::AgentTemplate;

use super::{
    AgentStore, ClientToolDelegate, CreditSink, EventSink, LlmChunkStream, LlmClient, LlmRequest,
    RunRecorder, RunStart, TerminalStatus,
};

/// One scripted answer for a [`MockLlm`] call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Chunks for a streaming call. A terminal [`LlmChunk::Done`] is
    /// appended when the script omits it.
    Stream(Vec<LlmChunk>),
    /// Responses for a non-streaming `prompt` call.
    Completions(Vec<String>),
    /// Object for a `prompt_structured` call.
    Structured(Value),
    /// Fail the call with the given error.
    Failure(LlmError),
}

/// A scripted LLM client.
///
/// Responses are consumed front to back, one per call; an exhausted script
/// fails the call so a looping agent cannot spin silently.
#[derive(Debug, Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    /// Create a client with a response script.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a script of streaming responses.
    #[must_use]
    pub fn streaming(scripts: impl IntoIterator<Item = Vec<LlmChunk>>) -> Self {
        Self::new(scripts.into_iter().map(MockResponse::Stream))
    }

    /// Every request the client has served, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of calls served so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn next_response(&self, request: LlmRequest) -> Result<MockResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| LlmError::invalid_response("mock script exhausted"))
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn prompt_stream(
        &self,
        request: LlmRequest,
        _signal: CancellationSignal,
    ) -> Result<LlmChunkStream, LlmError> {
        match self.next_response(request)? {
            MockResponse::Stream(mut chunks) => {
                if !matches!(chunks.last(), Some(LlmChunk::Done { .. })) {
                    chunks.push(LlmChunk::done());
                }
                Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            MockResponse::Failure(error) => Err(error),
            other => Err(LlmError::invalid_response(format!(
                "mock script expected a stream, found {other:?}"
            ))),
        }
    }

    async fn prompt(&self, request: LlmRequest, n: usize) -> Result<Vec<String>, LlmError> {
        match self.next_response(request)? {
            MockResponse::Completions(responses) => {
                if responses.len() == n {
                    Ok(responses)
                } else {
                    Err(LlmError::invalid_response(format!(
                        "mock script has {} completions, call asked for {n}",
                        responses.len()
                    )))
                }
            }
            MockResponse::Failure(error) => Err(error),
            other => Err(LlmError::invalid_response(format!(
                "mock script expected completions, found {other:?}"
            ))),
        }
    }

    async fn prompt_structured(
        &self,
        request: LlmRequest,
        schema: &Schema,
    ) -> Result<Value, LlmError> {
        match self.next_response(request)? {
            MockResponse::Structured(value) => {
                schema
                    .parse(&value)
                    .map_err(|err| LlmError::invalid_response(err.to_string()))?;
                Ok(value)
            }
            MockResponse::Failure(error) => Err(error),
            other => Err(LlmError::invalid_response(format!(
                "mock script expected a structured object, found {other:?}"
            ))),
        }
    }
}

/// A template store that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl AgentStore for NullStore {
    async fn fetch_agent(&self, _full_id: &str) -> Result<Option<AgentTemplate>, String> {
        Ok(None)
    }
}

/// Persistence hooks that drop everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

#[async_trait]
impl RunRecorder for NullRecorder {
    async fn start_agent_run(&self, _start: RunStart) {}
    async fn add_agent_step(&self, _run_id: &str, _step_number: u64) {}
    async fn finish_agent_run(&self, _run_id: &str, _status: TerminalStatus) {}
}

/// A recorder that keeps finished-run statuses in memory.
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    started: Mutex<Vec<RunStart>>,
    finished: Mutex<Vec<(String, TerminalStatus)>>,
}

impl RecordingRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs started so far.
    #[must_use]
    pub fn started(&self) -> Vec<RunStart> {
        self.started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Terminal statuses recorded so far.
    #[must_use]
    pub fn finished(&self) -> Vec<(String, TerminalStatus)> {
        self.finished
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RunRecorder for RecordingRecorder {
    async fn start_agent_run(&self, start: RunStart) {
        self.started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(start);
    }

    async fn add_agent_step(&self, _run_id: &str, _step_number: u64) {}

    async fn finish_agent_run(&self, run_id: &str, status: TerminalStatus) {
        self.finished
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((run_id.to_owned(), status));
    }
}

/// A credit sink that accepts every deduction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCredits;

#[async_trait]
impl CreditSink for NullCredits {
    async fn consume_credits(&self, _run_id: &str, _amount: u64) -> Result<(), String> {
        Ok(())
    }
}

/// A client tool delegate with no client attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClientTools;

#[async_trait]
impl ClientToolDelegate for NullClientTools {
    async fn request_client_tool(
        &self,
        _run_id: &str,
        tool_name: &str,
        _input: Value,
        _signal: CancellationSignal,
    ) -> Result<Vec<ToolResultPart>, String> {
        Err(format!("no client attached to serve tool `{tool_name}`"))
    }
}

/// A delegate serving `read_files` from an in-memory file map.
#[derive(Debug, Default)]
pub struct FileMapClientTools {
    files: HashMap<String, String>,
}

impl FileMapClientTools {
    /// Create a delegate over the given files.
    #[must_use]
    pub fn new(files: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ClientToolDelegate for FileMapClientTools {
    async fn request_client_tool(
        &self,
        _run_id: &str,
        tool_name: &str,
        input: Value,
        _signal: CancellationSignal,
    ) -> Result<Vec<ToolResultPart>, String> {
        if tool_name != "read_files" {
            return Err(format!("unsupported client tool `{tool_name}`"));
        }
        let paths = input
            .get("paths")
            .and_then(Value::as_array)
            .ok_or("read_files input needs a `paths` array")?;
        let mut parts = Vec::with_capacity(paths.len());
        for path in paths.iter().filter_map(Value::as_str) {
            match self.files.get(path) {
                Some(content) => parts.push(ToolResultPart::json(serde_json::json!({
                    "path": path,
                    "content": content,
                }))),
                None => parts.push(ToolResultPart::json(serde_json::json!({
                    "path": path,
                    "errorMessage": "file not found",
                }))),
            }
        }
        Ok(parts)
    }
}

/// An event sink collecting everything in memory.
#[derive(Debug, Default)]
pub struct CollectingEvents {
    events: Mutex<Vec<AgentEvent>>,
}

impl CollectingEvents {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event received so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for CollectingEvents {
    fn send_event(&self, event: AgentEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
