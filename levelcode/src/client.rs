//! External collaborator contracts.
//!
//! The loop controller consumes the LLM provider, template database,
//! persistence, credit accounting, client-delegated tools, and the caller's
//! event stream through the narrow traits in this module. The runtime ships
//! no concrete transport; see [`mock`] for the scripted in-process
//! implementations used by tests and examples.

pub mod mock;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancellationSignal;
use crate::error::LlmError;
use crate::events::AgentEvent;
use crate::message::{Message, ToolResultPart};
use crate::schema::Schema;
use crate::template::AgentTemplate;
use crate::tool::ToolDefinition;
use crate::stream::LlmChunk;

/// Token usage for one LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the request.
    pub input_tokens: u64,
    /// Tokens generated in the response.
    pub output_tokens: u64,
}

impl Usage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Credits charged for this usage.
    ///
    /// One credit per started thousand tokens, weighing output tokens
    /// against input at the conventional 4:1 ratio.
    #[must_use]
    pub const fn credits(&self) -> u64 {
        let weighted = self.input_tokens + self.output_tokens * 4;
        weighted.div_ceil(1000)
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A single LLM call: system prompt, history, and tool definitions.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier from the agent template.
    pub model: String,
    /// Resolved system prompt. Byte-identical to the parent's when the
    /// template inherits it, enabling provider-side prompt caching.
    pub system: String,
    /// Message history, oldest first.
    pub messages: Vec<Message>,
    /// Tool definitions offered for this call.
    pub tools: Vec<ToolDefinition>,
}

/// A boxed stream of LLM chunks.
pub type LlmChunkStream = Pin<Box<dyn Stream<Item = Result<LlmChunk, LlmError>> + Send>>;

/// The LLM provider client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream one completion. The stream terminates with
    /// [`LlmChunk::Done`] carrying the abort flag and provider message id.
    async fn prompt_stream(
        &self,
        request: LlmRequest,
        signal: CancellationSignal,
    ) -> Result<LlmChunkStream, LlmError>;

    /// Non-streaming completion; `n` parallel samples.
    async fn prompt(&self, request: LlmRequest, n: usize) -> Result<Vec<String>, LlmError>;

    /// Single-shot object response validated against a schema.
    async fn prompt_structured(
        &self,
        request: LlmRequest,
        schema: &Schema,
    ) -> Result<Value, LlmError>;
}

/// Remote agent template storage.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch a template by its full id, or `None` when unknown.
    async fn fetch_agent(&self, full_id: &str) -> Result<Option<AgentTemplate>, String>;
}

/// Identifying facts recorded when a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStart {
    /// Unique run id.
    pub run_id: String,
    /// Agent instance id.
    pub agent_id: String,
    /// Template id.
    pub agent_type: String,
    /// Spawning agent instance id, if any.
    pub parent_id: Option<String>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// The turn ended normally with valid output.
    Completed,
    /// The run hit a terminal error (budget, schema, programmatic failure).
    Failed,
    /// The run was cancelled through its signal.
    Cancelled,
}

impl TerminalStatus {
    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence hooks for run and step records.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// A run has started.
    async fn start_agent_run(&self, start: RunStart);

    /// One agent step completed.
    async fn add_agent_step(&self, run_id: &str, step_number: u64);

    /// The run reached a terminal status.
    async fn finish_agent_run(&self, run_id: &str, status: TerminalStatus);
}

/// Credit accounting.
#[async_trait]
pub trait CreditSink: Send + Sync {
    /// Deduct credits for a run. An `Err` rejects the deduction and
    /// terminates the run.
    async fn consume_credits(&self, run_id: &str, amount: u64) -> Result<(), String>;
}

/// Delegation of tools that run on the user's machine (file reads, shell).
#[async_trait]
pub trait ClientToolDelegate: Send + Sync {
    /// Execute a tool on the client and return its output parts.
    async fn request_client_tool(
        &self,
        run_id: &str,
        tool_name: &str,
        input: Value,
        signal: CancellationSignal,
    ) -> Result<Vec<ToolResultPart>, String>;
}

/// The caller's output stream.
pub trait EventSink: Send + Sync {
    /// Push a typed event. Must not block.
    fn send_event(&self, event: AgentEvent);
}

/// A no-op event sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl EventSink for NullEvents {
    fn send_event(&self, _event: AgentEvent) {}
}

/// Convenience alias for a shared event sink.
pub type SharedEvents = Arc<dyn EventSink>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn usage_credits_round_up() {
        assert_eq!(Usage::new(0, 0).credits(), 0);
        assert_eq!(Usage::new(1, 0).credits(), 1);
        assert_eq!(Usage::new(1000, 0).credits(), 1);
        assert_eq!(Usage::new(0, 250).credits(), 1);
        assert_eq!(Usage::new(500, 500).credits(), 3);
    }

    #[test]
    fn usage_add_assign_accumulates() {
        let mut total = Usage::new(10, 20);
        total += Usage::new(5, 5);
        assert_eq!(total, Usage::new(15, 25));
    }

    #[test]
    fn terminal_status_display() {
        assert_eq!(TerminalStatus::Completed.to_string(), "completed");
        assert_eq!(TerminalStatus::Failed.to_string(), "failed");
        assert_eq!(TerminalStatus::Cancelled.to_string(), "cancelled");
    }
}
