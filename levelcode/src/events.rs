//! Typed events pushed to the caller's output stream.
//!
//! Every event is tagged with the emitting agent's identity so a client can
//! demultiplex interleaved subagent output. Event order for one agent
//! matches the order of the corresponding history appends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ToolResultPart;

/// An event emitted by a running agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Id of the agent instance that produced the event.
    pub agent_id: String,
    /// Template id of that agent.
    pub agent_type: String,
    /// Id of the spawning agent, for subagent output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
    /// The event body.
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// The body of an [`AgentEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventPayload {
    /// Incremental assistant text.
    Text {
        /// The text delta.
        text: String,
    },
    /// A tool call was accepted and recorded.
    ToolCall {
        /// Id of the call.
        tool_call_id: String,
        /// Tool being invoked.
        tool_name: String,
        /// Structured input.
        input: Value,
    },
    /// A tool call finished and its result was recorded.
    ToolResult {
        /// Id of the call this result answers.
        tool_call_id: String,
        /// Tool that produced the output.
        tool_name: String,
        /// Ordered output parts.
        output: Vec<ToolResultPart>,
    },
    /// A subagent is starting.
    SubagentStart {
        /// The child agent's instance id.
        agent_id: String,
        /// The child agent's template id.
        agent_type: String,
    },
    /// A subagent finished.
    SubagentFinish {
        /// The child agent's instance id.
        agent_id: String,
        /// The child agent's template id.
        agent_type: String,
    },
    /// A user-visible error.
    Error {
        /// The error message.
        message: String,
    },
}

impl AgentEvent {
    /// Create an event for the given agent identity.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        parent_agent_id: Option<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            parent_agent_id,
            payload,
        }
    }
}
