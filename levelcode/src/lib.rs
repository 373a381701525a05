//! levelcode — an orchestration runtime for LLM-driven coding agents.
//!
//! An agent is a declarative [`AgentTemplate`]: prompts, a tool allowlist,
//! input/output schemas, and optionally a programmatic step function. The
//! runtime drives agents through multi-step loops, dispatches tool calls,
//! spawns recursive subagents, enforces output validation, and streams
//! incremental results to the caller.
//!
//! The crate implements the step loop and tool dispatch engine. The LLM
//! transport, persistence, credit accounting, and the client UI stay behind
//! the trait surface in [`client`]; scripted in-process implementations for
//! tests live in [`client::mock`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use levelcode::prelude::*;
//!
//! let template = AgentTemplate::builder("base-agent", "sonnet-4")
//!     .system_prompt("You are a careful coding agent.")
//!     .tools(["read_files", "end_turn"])
//!     .build()?;
//!
//! let env = RunEnv::builder(llm_client)
//!     .agents(AgentRegistry::with_bundled([template]))
//!     .build();
//!
//! let outcome = run_agent(&env, "base-agent", "Read a.txt", CancellationSignal::new()).await?;
//! ```

pub mod agent;
pub mod cancel;
pub mod client;
pub mod env;
pub mod error;
pub mod events;
pub mod generator;
pub mod message;
pub mod overlay;
pub mod prelude;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod state;
pub mod stream;
pub mod template;
pub mod tool;
pub mod tools;

pub use agent::{ParentContext, RunOutcome, RunOutput, loop_agent_steps, run_agent};
pub use cancel::CancellationSignal;
pub use client::{LlmClient, TerminalStatus, Usage};
pub use env::{RunEnv, RuntimeConfig};
pub use error::{Error, LlmError, Result, ToolError};
pub use events::{AgentEvent, EventPayload};
pub use generator::{StepDirective, StepError, StepHandle, StepProgram};
pub use message::{ContentPart, Message, MessageTag, Role, TimeToLive, ToolCall, ToolResultPart};
pub use registry::AgentRegistry;
pub use schema::Schema;
pub use state::AgentState;
pub use template::{AgentTemplate, OutputMode};
pub use tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
