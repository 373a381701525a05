//! Agent templates.
//!
//! An [`AgentTemplate`] is the immutable declaration of an agent: prompts,
//! tool allowlist, spawnable children, input/output schemas, and an optional
//! programmatic step function. Templates are created at registry load and
//! never mutated; running instances hold them behind `Arc`.

use std::fmt;

use thiserror::Error;

use crate::generator::StepProgram;
use crate::registry::{IdParseError, parse_agent_id};
use crate::schema::Schema;

/// How a finished run's output is shaped for the caller (or a spawning
/// parent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The last assistant text message.
    #[default]
    LastMessage,
    /// The object recorded through `set_output`.
    StructuredOutput,
    /// The full history slice produced by the run.
    AllMessages,
}

/// Errors raised when building or validating a template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// The template id failed the id grammar.
    #[error(transparent)]
    InvalidId(#[from] IdParseError),

    /// `inherit_parent_system_prompt` combined with a non-empty system
    /// prompt.
    #[error("template `{0}` sets both a system prompt and inherit_parent_system_prompt")]
    PromptConflict(String),

    /// The template names no model.
    #[error("template `{0}` has an empty model")]
    EmptyModel(String),

    /// A spawnable agent id failed the id grammar.
    #[error("template `{id}` lists invalid spawnable agent `{child}`: {source}")]
    InvalidSpawnable {
        /// The declaring template.
        id: String,
        /// The offending child id.
        child: String,
        /// The underlying parse failure.
        source: IdParseError,
    },

    /// The template inherits its parent's system prompt but was started
    /// without a parent.
    #[error("template `{0}` inherits its parent's system prompt but has no parent")]
    MissingParent(String),
}

/// Immutable declaration of an agent.
#[derive(Clone)]
pub struct AgentTemplate {
    /// Template id (`[publisher/]name[@version]`).
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Model identifier passed to the LLM client.
    pub model: String,
    /// System prompt. Empty when the template inherits the parent's.
    pub system_prompt: String,
    /// Instructions appended as an ephemeral user message each turn.
    pub instructions_prompt: String,
    /// Step hint appended as an ephemeral user message each turn.
    pub step_prompt: String,
    /// Ordered set of tool names the agent may invoke.
    pub tool_names: Vec<String>,
    /// Agent ids this agent may spawn.
    pub spawnable_agents: Vec<String>,
    /// Schema for spawn params / top-level input.
    pub input_schema: Schema,
    /// Schema the run output must satisfy, when present.
    pub output_schema: Option<Schema>,
    /// Output shaping for the caller.
    pub output_mode: OutputMode,
    /// Whether spawned children inherit this agent's message history.
    pub include_message_history: bool,
    /// Whether this agent reuses its parent's resolved system prompt
    /// byte-for-byte (mutually exclusive with `system_prompt`).
    pub inherit_parent_system_prompt: bool,
    /// Optional programmatic step function.
    pub handle_steps: Option<StepProgram>,
}

impl fmt::Debug for AgentTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTemplate")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("tool_names", &self.tool_names)
            .field("spawnable_agents", &self.spawnable_agents)
            .field("output_mode", &self.output_mode)
            .field("has_handle_steps", &self.handle_steps.is_some())
            .finish_non_exhaustive()
    }
}

impl AgentTemplate {
    /// Start building a template.
    #[must_use]
    pub fn builder(id: impl Into<String>, model: impl Into<String>) -> AgentTemplateBuilder {
        AgentTemplateBuilder::new(id, model)
    }

    /// Returns `true` if the template declares a programmatic step function.
    #[must_use]
    pub const fn has_handle_steps(&self) -> bool {
        self.handle_steps.is_some()
    }

    /// Returns `true` if the named tool is on this template's allowlist.
    #[must_use]
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.tool_names.iter().any(|name| name == tool_name)
    }

    /// Returns `true` if the given agent type may be spawned by this agent.
    #[must_use]
    pub fn can_spawn(&self, agent_type: &str) -> bool {
        self.spawnable_agents.iter().any(|id| id == agent_type)
    }
}

/// Builder for [`AgentTemplate`]; validation happens at
/// [`build`](AgentTemplateBuilder::build).
#[derive(Debug)]
pub struct AgentTemplateBuilder {
    template: AgentTemplate,
}

impl AgentTemplateBuilder {
    fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            template: AgentTemplate {
                display_name: id.clone(),
                id,
                model: model.into(),
                system_prompt: String::new(),
                instructions_prompt: String::new(),
                step_prompt: String::new(),
                tool_names: Vec::new(),
                spawnable_agents: Vec::new(),
                input_schema: Schema::any_object(),
                output_schema: None,
                output_mode: OutputMode::default(),
                include_message_history: false,
                inherit_parent_system_prompt: false,
                handle_steps: None,
            },
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.template.display_name = name.into();
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.template.system_prompt = prompt.into();
        self
    }

    /// Set the instructions prompt.
    #[must_use]
    pub fn instructions_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.template.instructions_prompt = prompt.into();
        self
    }

    /// Set the step prompt.
    #[must_use]
    pub fn step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.template.step_prompt = prompt.into();
        self
    }

    /// Append a tool to the allowlist (duplicates collapse).
    #[must_use]
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.template.tool_names.contains(&name) {
            self.template.tool_names.push(name);
        }
        self
    }

    /// Append several tools to the allowlist.
    #[must_use]
    pub fn tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self = self.tool(name);
        }
        self
    }

    /// Allow spawning the given agent type.
    #[must_use]
    pub fn spawnable(mut self, agent_type: impl Into<String>) -> Self {
        self.template.spawnable_agents.push(agent_type.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.template.input_schema = schema;
        self
    }

    /// Require the run output to satisfy a schema.
    #[must_use]
    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.template.output_schema = Some(schema);
        self
    }

    /// Set the output shaping mode.
    #[must_use]
    pub const fn output_mode(mut self, mode: OutputMode) -> Self {
        self.template.output_mode = mode;
        self
    }

    /// Spawned children receive a copy of this agent's history.
    #[must_use]
    pub const fn include_message_history(mut self, include: bool) -> Self {
        self.template.include_message_history = include;
        self
    }

    /// Reuse the parent's resolved system prompt byte-for-byte.
    #[must_use]
    pub const fn inherit_parent_system_prompt(mut self, inherit: bool) -> Self {
        self.template.inherit_parent_system_prompt = inherit;
        self
    }

    /// Attach a programmatic step function.
    #[must_use]
    pub fn handle_steps(mut self, program: StepProgram) -> Self {
        self.template.handle_steps = Some(program);
        self
    }

    /// Validate and produce the template.
    pub fn build(self) -> Result<AgentTemplate, TemplateError> {
        let template = self.template;
        parse_agent_id(&template.id)?;
        if template.model.is_empty() {
            return Err(TemplateError::EmptyModel(template.id));
        }
        if template.inherit_parent_system_prompt && !template.system_prompt.is_empty() {
            return Err(TemplateError::PromptConflict(template.id));
        }
        for child in &template.spawnable_agents {
            if let Err(source) = parse_agent_id(child) {
                return Err(TemplateError::InvalidSpawnable {
                    id: template.id,
                    child: child.clone(),
                    source,
                });
            }
        }
        Ok(template)
    }
}
