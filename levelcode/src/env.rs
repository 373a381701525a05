//! Shared runtime services and configuration.
//!
//! A [`RunEnv`] bundles every external collaborator plus the process-wide
//! stores (generator registry, proposed-content overlay, agent registry,
//! tool registry). One `RunEnv` is shared by a whole run tree; it is cheap
//! to clone behind `Arc`.

use std::fmt;
use std::sync::Arc;

use crate::client::{
    AgentStore, ClientToolDelegate, CreditSink, EventSink, LlmClient, NullEvents, RunRecorder,
};
use crate::client::mock::{NullClientTools, NullCredits, NullRecorder, NullStore};
use crate::generator::GeneratorRegistry;
use crate::overlay::ProposedContentStore;
use crate::registry::AgentRegistry;
use crate::retry::RetryPolicy;
use crate::tool::ToolRegistry;
use crate::tools;

/// Tunables for the loop controller and spawner.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Step budget for top-level and spawned runs.
    pub default_steps: u32,
    /// Maximum children of one `spawn_agents` call running at once.
    pub spawn_fan_out: usize,
    /// Retry behavior for external calls.
    pub retry: RetryPolicy,
    /// Direct credits charged per client-delegated tool call.
    pub client_tool_credits: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_steps: 20,
            spawn_fan_out: 3,
            retry: RetryPolicy::default(),
            client_tool_credits: 1,
        }
    }
}

impl RuntimeConfig {
    /// Set the default step budget.
    #[must_use]
    pub const fn with_default_steps(mut self, steps: u32) -> Self {
        self.default_steps = steps;
        self
    }

    /// Set the spawn fan-out cap.
    #[must_use]
    pub const fn with_spawn_fan_out(mut self, fan_out: usize) -> Self {
        self.spawn_fan_out = fan_out;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Shared services for a run tree.
pub struct RunEnv {
    /// The LLM provider client.
    pub llm: Arc<dyn LlmClient>,
    /// Remote template storage.
    pub store: Arc<dyn AgentStore>,
    /// Run/step persistence hooks.
    pub recorder: Arc<dyn RunRecorder>,
    /// Credit accounting.
    pub credits: Arc<dyn CreditSink>,
    /// Client-delegated tool execution.
    pub client_tools: Arc<dyn ClientToolDelegate>,
    /// The caller's output stream.
    pub events: Arc<dyn EventSink>,
    /// Agent template resolution.
    pub agents: AgentRegistry,
    /// Registered tool handlers.
    pub tools: ToolRegistry,
    /// Live programmatic step generators, keyed by run id.
    pub generators: GeneratorRegistry,
    /// Per-run proposed file contents.
    pub proposed: ProposedContentStore,
    /// Loop tunables.
    pub config: RuntimeConfig,
}

impl fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEnv")
            .field("agents", &self.agents)
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunEnv {
    /// Start building an environment around an LLM client.
    #[must_use]
    pub fn builder(llm: Arc<dyn LlmClient>) -> RunEnvBuilder {
        RunEnvBuilder {
            llm,
            store: None,
            recorder: None,
            credits: None,
            client_tools: None,
            events: None,
            agents: None,
            tools: None,
            config: RuntimeConfig::default(),
        }
    }
}

/// Builder for [`RunEnv`]; every collaborator except the LLM client has a
/// no-op default.
pub struct RunEnvBuilder {
    llm: Arc<dyn LlmClient>,
    store: Option<Arc<dyn AgentStore>>,
    recorder: Option<Arc<dyn RunRecorder>>,
    credits: Option<Arc<dyn CreditSink>>,
    client_tools: Option<Arc<dyn ClientToolDelegate>>,
    events: Option<Arc<dyn EventSink>>,
    agents: Option<AgentRegistry>,
    tools: Option<ToolRegistry>,
    config: RuntimeConfig,
}

impl fmt::Debug for RunEnvBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEnvBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunEnvBuilder {
    /// Use a remote template store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use persistence hooks.
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Use a credit sink.
    #[must_use]
    pub fn credits(mut self, credits: Arc<dyn CreditSink>) -> Self {
        self.credits = Some(credits);
        self
    }

    /// Use a client tool delegate.
    #[must_use]
    pub fn client_tools(mut self, delegate: Arc<dyn ClientToolDelegate>) -> Self {
        self.client_tools = Some(delegate);
        self
    }

    /// Use an event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use an agent registry.
    #[must_use]
    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Use a tool registry instead of the built-in set.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Override the runtime configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the environment.
    #[must_use]
    pub fn build(self) -> Arc<RunEnv> {
        Arc::new(RunEnv {
            llm: self.llm,
            store: self.store.unwrap_or_else(|| Arc::new(NullStore)),
            recorder: self.recorder.unwrap_or_else(|| Arc::new(NullRecorder)),
            credits: self.credits.unwrap_or_else(|| Arc::new(NullCredits)),
            client_tools: self
                .client_tools
                .unwrap_or_else(|| Arc::new(NullClientTools)),
            events: self.events.unwrap_or_else(|| Arc::new(NullEvents)),
            agents: self.agents.unwrap_or_default(),
            tools: self.tools.unwrap_or_else(tools::builtin_registry),
            generators: GeneratorRegistry::new(),
            proposed: ProposedContentStore::new(),
            config: self.config,
        })
    }
}
