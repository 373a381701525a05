//! Per-run mutable agent state.
//!
//! One [`AgentState`] exists per running agent instance. All mutation is
//! strictly serial within a run (at most one in-flight tool call, one
//! in-flight LLM turn); states are never shared between tasks.

use serde_json::Value;
use uuid::Uuid;

use crate::message::{Message, Role};

/// Mutable state of a running agent instance.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// Unique id of this instance.
    pub agent_id: String,
    /// Template id this instance was created from.
    pub agent_type: String,
    /// Id of the spawning agent, if any.
    pub parent_id: Option<String>,
    /// Unique id of this run.
    pub run_id: String,
    /// Conversation history, oldest first.
    pub message_history: Vec<Message>,
    /// Output recorded through `set_output`.
    pub output: Option<Value>,
    /// Remaining step budget.
    pub steps_remaining: u32,
    /// Credits consumed by LLM calls. Never decreases.
    pub credits_used: u64,
    /// Credits consumed by client-delegated tools. Never decreases.
    pub direct_credits_used: u64,
    /// Run ids of spawned children, in spawn order.
    pub child_run_ids: Vec<String>,
    /// Free-form blob visible to programmatic steps.
    pub agent_context: Value,
}

impl AgentState {
    /// Create state for a fresh top-level run.
    #[must_use]
    pub fn new(agent_type: impl Into<String>, steps_remaining: u32) -> Self {
        Self {
            agent_id: Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            parent_id: None,
            run_id: Uuid::new_v4().to_string(),
            message_history: Vec::new(),
            output: None,
            steps_remaining,
            credits_used: 0,
            direct_credits_used: 0,
            child_run_ids: Vec::new(),
            agent_context: Value::Null,
        }
    }

    /// Create state for a child spawned by this agent.
    ///
    /// The child gets fresh ids and, when `history` is given, starts from
    /// that copied slice.
    #[must_use]
    pub fn child(
        &self,
        agent_type: impl Into<String>,
        steps_remaining: u32,
        history: Vec<Message>,
    ) -> Self {
        Self {
            agent_id: Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            parent_id: Some(self.agent_id.clone()),
            run_id: Uuid::new_v4().to_string(),
            message_history: history,
            output: None,
            steps_remaining,
            credits_used: 0,
            direct_credits_used: 0,
            child_run_ids: Vec::new(),
            agent_context: Value::Null,
        }
    }

    /// Append a message.
    pub fn push_message(&mut self, message: Message) {
        self.message_history.push(message);
    }

    /// Drop messages tagged to expire on the next user prompt.
    pub fn expire_user_prompt_messages(&mut self) {
        self.message_history
            .retain(|message| !message.expires_on_user_prompt());
    }

    /// Concatenated text of the last assistant message carrying text, if any.
    #[must_use]
    pub fn last_assistant_text(&self) -> Option<String> {
        self.message_history
            .iter()
            .rev()
            .filter(|message| message.role == Role::Assistant)
            .find_map(Message::text_content)
    }

    /// Record LLM credits. Monotonic.
    pub fn add_credits(&mut self, amount: u64) {
        self.credits_used += amount;
    }

    /// Record client-delegated credits. Monotonic.
    pub fn add_direct_credits(&mut self, amount: u64) {
        self.direct_credits_used += amount;
    }

    /// Set a field on the output object, creating the object if needed.
    ///
    /// Used by the loop to record `output.error` on programmatic failures
    /// without clobbering output the run already produced.
    pub fn set_output_field(&mut self, key: &str, value: Value) {
        match &mut self.output {
            Some(Value::Object(map)) => {
                map.insert(key.to_owned(), value);
            }
            _ => {
                self.output = Some(serde_json::json!({ key: value }));
            }
        }
    }
}
