//! Tool handler trait and dispatch types.
//!
//! Tools are the runtime's capabilities: each handler receives dynamic JSON
//! input (already validated against its schema) and a [`ToolContext`] giving
//! it serialized access to the owning agent's state and the shared services.
//!
//! Within one agent all tool execution is strictly serial. Handlers still
//! receive an ordering token ([`OrderingToken`]) resolving when the previous
//! call's result has been recorded; write-type handlers await it before
//! mutating shared stores, read-type handlers may ignore it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::cancel::CancellationSignal;
use crate::env::RunEnv;
use crate::error::ToolError;
use crate::message::ToolResultPart;
use crate::state::AgentState;
use crate::template::AgentTemplate;

/// Definition of a tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (snake_case).
    pub name: String,
    /// What the tool does; guides the model's choice.
    pub description: String,
    /// JSON schema for the tool's input.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Execution context handed to tool handlers.
///
/// Borrows the owning agent's state mutably: handler execution is the only
/// writer while a call is in flight.
pub struct ToolContext<'a> {
    /// The owning agent's mutable state.
    pub state: &'a mut AgentState,
    /// The owning agent's template.
    pub template: &'a AgentTemplate,
    /// Shared runtime services.
    pub env: &'a Arc<RunEnv>,
    /// The run's cancellation signal.
    pub signal: &'a CancellationSignal,
    /// The agent's resolved system prompt (for child inheritance).
    pub system_prompt: &'a str,
    /// The agent's resolved tool names (for child inheritance).
    pub tool_names: &'a [String],
    /// Resolves when the previous tool call's result has been recorded.
    pub previous_call_finished: OrderingToken,
}

impl fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent_id", &self.state.agent_id)
            .field("run_id", &self.state.run_id)
            .finish_non_exhaustive()
    }
}

impl ToolContext<'_> {
    /// Returns an error if the run has been cancelled.
    pub fn ensure_active(&self) -> Result<(), ToolError> {
        if self.signal.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The core trait implemented by every tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool's definition (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool. Input has already been validated against
    /// [`definition().parameters`](ToolDefinition::parameters).
    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError>;

    /// Whether a successful call ends the agent's turn.
    fn ends_turn(&self) -> bool {
        false
    }
}

/// A shared, dynamically dispatched tool handler.
pub type SharedTool = Arc<dyn ToolHandler>;

/// Registry of all tool handlers known to the runtime.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, SharedTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its definition name.
    pub fn register(&mut self, tool: impl ToolHandler + 'static) {
        self.register_shared(Arc::new(tool));
    }

    /// Register an already-shared handler.
    pub fn register_shared(&mut self, tool: SharedTool) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// Get a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.tools.get(name)
    }

    /// Returns `true` if a handler is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve an allowlist of names into the per-run tool set, silently
    /// skipping names with no registered handler.
    #[must_use]
    pub fn resolve(&self, names: &[String]) -> ToolSet {
        let tools = names
            .iter()
            .filter_map(|name| self.tools.get(name).map(Arc::clone))
            .collect();
        ToolSet { tools }
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// The ordered tool set resolved for one run.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<SharedTool>,
}

impl ToolSet {
    /// Get a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.tools.iter().find(|tool| tool.definition().name == name)
    }

    /// Definitions of every tool in the set, in allowlist order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Names of every tool in the set.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.definition().name).collect()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}

/// A future resolving once the previous tool call's result was recorded.
///
/// Already resolved for the first call of a run.
#[derive(Clone, Default)]
pub struct OrderingToken(Option<Shared<BoxFuture<'static, ()>>>);

impl fmt::Debug for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OrderingToken")
            .field(&self.0.is_some())
            .finish()
    }
}

impl OrderingToken {
    /// A token with no predecessor.
    #[must_use]
    pub const fn resolved() -> Self {
        Self(None)
    }

    /// Wait for the previous call to finish.
    pub async fn wait(self) {
        if let Some(previous) = self.0 {
            previous.await;
        }
    }
}

/// Marks a tool call finished, releasing the next call's [`OrderingToken`].
///
/// Dropping without calling [`finish`](Self::finish) releases it too, so an
/// abandoned call can never wedge the chain.
#[derive(Debug)]
pub struct CallCompletion(oneshot::Sender<()>);

impl CallCompletion {
    /// Explicitly mark the call finished.
    pub fn finish(self) {
        let _ = self.0.send(());
    }
}

/// Per-run chain handing each tool call a token for its predecessor.
#[derive(Default)]
pub struct OrderingChain {
    last: Option<Shared<BoxFuture<'static, ()>>>,
}

impl fmt::Debug for OrderingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingChain")
            .field("outstanding", &self.last.is_some())
            .finish()
    }
}

impl OrderingChain {
    /// Create a chain with no outstanding calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a call: returns the token for the previous call and the
    /// completion marker for this one.
    pub fn begin(&mut self) -> (OrderingToken, CallCompletion) {
        let token = OrderingToken(self.last.clone());
        let (tx, rx) = oneshot::channel::<()>();
        let fut: BoxFuture<'static, ()> = async move {
            let _ = rx.await;
        }
        .boxed();
        self.last = Some(fut.shared());
        (token, CallCompletion(tx))
    }
}
