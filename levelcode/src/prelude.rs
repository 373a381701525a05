//! Convenience re-exports for embedding applications.
//!
//! ```rust,ignore
//! use levelcode::prelude::*;
//! ```

pub use crate::agent::{ParentContext, RunOutcome, RunOutput, loop_agent_steps, run_agent};
pub use crate::cancel::CancellationSignal;
pub use crate::client::{
    AgentStore, ClientToolDelegate, CreditSink, EventSink, LlmClient, LlmRequest, RunRecorder,
    TerminalStatus, Usage,
};
pub use crate::env::{RunEnv, RuntimeConfig};
pub use crate::error::{Error, LlmError, Result, ToolError};
pub use crate::events::{AgentEvent, EventPayload};
pub use crate::generator::{StepDirective, StepError, StepHandle, StepProgram};
pub use crate::message::{
    ContentPart, Message, MessageTag, Role, TimeToLive, ToolCall, ToolResultPart,
};
pub use crate::registry::{AgentRegistry, parse_agent_id};
pub use crate::schema::Schema;
pub use crate::state::AgentState;
pub use crate::stream::{LlmChunk, ParsedEvent, StreamParser};
pub use crate::template::{AgentTemplate, OutputMode};
pub use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
