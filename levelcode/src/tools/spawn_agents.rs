//! Recursive subagent spawning.
//!
//! `spawn_agents` fans out N children, each a full recursive run of the loop
//! controller on its own state. Children run concurrently up to the
//! configured fan-out cap; results aggregate in input order, and one child's
//! failure fills only its own slot.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::agent::runner::{ParentContext, RunOutput, loop_agent_steps};
use crate::cancel::CancellationSignal;
use crate::client::TerminalStatus;
use crate::env::RunEnv;
use crate::error::ToolError;
use crate::events::{AgentEvent, EventPayload};
use crate::message::{Message, MessageTag, ToolResultPart};
use crate::state::AgentState;
use crate::template::AgentTemplate;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler};

/// One spawn request from the model.
#[derive(Debug, Clone, Deserialize)]
struct SpawnRequest {
    agent_type: String,
    prompt: String,
    #[serde(default)]
    params: Option<Value>,
}

/// A prepared child run.
struct ChildJob {
    template: Arc<AgentTemplate>,
    state: AgentState,
    prompt: String,
    parent: Option<ParentContext>,
}

/// One slot of the aggregate result: a runnable child or an immediate error.
enum SpawnSlot {
    Job(Box<ChildJob>),
    Rejected { agent_type: String, message: String },
}

/// The `spawn_agents` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnAgentsTool;

#[async_trait]
impl ToolHandler for SpawnAgentsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "spawn_agents",
            "Spawns subagents to work on tasks in parallel. Each entry names an \
             agent type you may spawn and the prompt it should work on.",
            json!({
                "type": "object",
                "properties": {
                    "agents": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "agent_type": { "type": "string" },
                                "prompt": { "type": "string" },
                                "params": { "type": "object" }
                            },
                            "required": ["agent_type", "prompt"]
                        }
                    }
                },
                "required": ["agents"]
            }),
        )
    }

    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        ctx.ensure_active()?;
        let requests: Vec<SpawnRequest> = serde_json::from_value(
            input.get("agents").cloned().unwrap_or(Value::Null),
        )?;

        let mut slots = Vec::with_capacity(requests.len());
        for request in requests {
            slots.push(prepare_child(ctx, request).await);
        }

        let fan_out = ctx.env.config.spawn_fan_out.max(1);
        let env = Arc::clone(ctx.env);
        let signal = ctx.signal.clone();
        let jobs = slots.into_iter().map(move |slot| {
            let env = Arc::clone(&env);
            let signal = signal.clone();
            async move {
                match slot {
                    SpawnSlot::Rejected {
                        agent_type,
                        message,
                    } => json!({
                        "agentType": agent_type,
                        "errorMessage": message,
                    }),
                    SpawnSlot::Job(job) => run_child(env, *job, signal).await,
                }
            }
        });
        let results: Vec<Value> = futures::stream::iter(jobs)
            .buffered(fan_out)
            .collect()
            .await;

        Ok(vec![ToolResultPart::json(Value::Array(results))])
    }
}

/// Resolve, validate, and build one child run. Resolution and validation
/// failures become per-slot errors, not tool failures: the envelope was
/// well-formed, so the model sees a structured result it can react to.
async fn prepare_child(ctx: &mut ToolContext<'_>, request: SpawnRequest) -> SpawnSlot {
    let rejected = |message: String| SpawnSlot::Rejected {
        agent_type: request.agent_type.clone(),
        message,
    };

    if !ctx.template.can_spawn(&request.agent_type) {
        return rejected(format!(
            "agent type `{}` is not spawnable by `{}`",
            request.agent_type, ctx.template.id
        ));
    }

    let template = match ctx
        .env
        .agents
        .resolve(&request.agent_type, ctx.env.store.as_ref())
        .await
    {
        Ok(template) => template,
        Err(err) => return rejected(err.to_string()),
    };

    if let Some(params) = &request.params
        && let Err(err) = template.input_schema.parse(params)
    {
        return rejected(format!(
            "invalid params for `{}`: {err}",
            request.agent_type
        ));
    }

    let history = if template.include_message_history {
        ctx.state
            .message_history
            .iter()
            .filter(|message| !message.expires_on_user_prompt())
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let mut child = ctx.state.child(
        template.id.clone(),
        ctx.env.config.default_steps,
        history,
    );
    child.push_message(
        Message::user(describe_spawn(ctx.state, &request)).tagged(MessageTag::SubagentSpawn),
    );
    ctx.state.child_run_ids.push(child.run_id.clone());

    let parent = template.inherit_parent_system_prompt.then(|| ParentContext {
        system_prompt: ctx.system_prompt.to_owned(),
        tool_names: ctx.tool_names.to_vec(),
    });

    info!(
        parent = %ctx.state.agent_id,
        child = %child.agent_id,
        agent_type = %template.id,
        "spawning subagent",
    );

    SpawnSlot::Job(Box::new(ChildJob {
        template,
        state: child,
        prompt: request.prompt,
        parent,
    }))
}

/// The synthetic user message recorded in the child's history.
fn describe_spawn(parent: &AgentState, request: &SpawnRequest) -> String {
    let mut note = format!(
        "You are a `{}` subagent spawned by agent `{}`.",
        request.agent_type, parent.agent_type
    );
    if let Some(params) = &request.params {
        note.push_str("\nParams: ");
        note.push_str(&params.to_string());
    }
    note
}

/// Run one child to completion, bracketing its output with subagent events.
async fn run_child(env: Arc<RunEnv>, job: ChildJob, signal: CancellationSignal) -> Value {
    let agent_id = job.state.agent_id.clone();
    let agent_type = job.state.agent_type.clone();
    let parent_agent_id = job.state.parent_id.clone();

    env.events.send_event(AgentEvent::new(
        agent_id.clone(),
        agent_type.clone(),
        parent_agent_id.clone(),
        EventPayload::SubagentStart {
            agent_id: agent_id.clone(),
            agent_type: agent_type.clone(),
        },
    ));

    let outcome = Box::pin(loop_agent_steps(
        Arc::clone(&env),
        job.template,
        job.state,
        Some(job.prompt),
        job.parent,
        signal,
    ))
    .await;

    env.events.send_event(AgentEvent::new(
        agent_id.clone(),
        agent_type.clone(),
        parent_agent_id,
        EventPayload::SubagentFinish {
            agent_id: agent_id.clone(),
            agent_type: agent_type.clone(),
        },
    ));

    match outcome.status {
        TerminalStatus::Completed => json!({
            "agentId": agent_id,
            "agentType": agent_type,
            "output": child_output_value(outcome.output),
        }),
        TerminalStatus::Failed | TerminalStatus::Cancelled => json!({
            "agentId": agent_id,
            "agentType": agent_type,
            "errorMessage": outcome
                .output
                .error_message()
                .unwrap_or("subagent failed")
                .to_owned(),
        }),
    }
}

/// Shape a child's output for the aggregate result, per its output mode.
fn child_output_value(output: RunOutput) -> Value {
    match output {
        RunOutput::LastMessage { text } => Value::String(text),
        RunOutput::StructuredOutput { output } => output,
        RunOutput::AllMessages { messages } => {
            serde_json::to_value(messages).unwrap_or(Value::Null)
        }
        RunOutput::Error { message } => json!({ "errorMessage": message }),
    }
}
