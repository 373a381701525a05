//! The agent engine: tool execution, LLM steps, programmatic steps, and the
//! loop controller that alternates them.

pub mod executor;
pub mod programmatic;
pub mod runner;
pub mod step;

pub use runner::{ParentContext, RunOutcome, RunOutput, loop_agent_steps, run_agent};

use std::sync::Arc;

use crate::cancel::CancellationSignal;
use crate::env::RunEnv;
use crate::events::{AgentEvent, EventPayload};
use crate::state::AgentState;
use crate::template::AgentTemplate;
use crate::tool::{OrderingChain, ToolSet};

/// Everything a run's components need, borrowed for the run's lifetime.
///
/// Holds the only mutable borrow of the agent state, making the
/// one-writer-per-agent rule structural.
pub(crate) struct RunScope<'a> {
    pub env: &'a Arc<RunEnv>,
    pub template: &'a Arc<AgentTemplate>,
    pub tools: &'a ToolSet,
    pub tool_names: &'a [String],
    pub system_prompt: &'a str,
    pub state: &'a mut AgentState,
    pub signal: &'a CancellationSignal,
    pub ordering: OrderingChain,
}

impl RunScope<'_> {
    /// Push an event tagged with this agent's identity.
    pub fn emit(&self, payload: EventPayload) {
        self.env.events.send_event(AgentEvent::new(
            self.state.agent_id.clone(),
            self.state.agent_type.clone(),
            self.state.parent_id.clone(),
            payload,
        ));
    }
}
