//! The loop controller.
//!
//! [`loop_agent_steps`] drives one agent run: alternating programmatic and
//! LLM steps until the turn ends, enforcing the step budget, validating
//! output against the template's schema (with corrective retries), handling
//! cancellation, and finalizing persistence plus the per-run stores.
//!
//! Subagents re-enter this function recursively through the `spawn_agents`
//! tool; each child runs on its own [`AgentState`] and may be scheduled in
//! parallel with its siblings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span};

use crate::cancel::CancellationSignal;
use crate::client::{RunStart, TerminalStatus};
use crate::env::RunEnv;
use crate::error::{Error, Result};
use crate::events::{AgentEvent, EventPayload};
use crate::message::{Message, MessageTag};
use crate::state::AgentState;
use crate::template::{AgentTemplate, OutputMode, TemplateError};
use crate::tool::OrderingChain;

use super::RunScope;
use super::programmatic::{ProgrammaticOutcome, run_programmatic_step};
use super::step::run_agent_step;

/// Corrective message injected when the turn ends without valid output.
pub const OUTPUT_RETRY_MESSAGE: &str =
    "You must call set_output with output matching the required schema before ending the turn.";

/// Error message for an exhausted step budget.
pub const BUDGET_EXCEEDED_MESSAGE: &str = "Step budget exceeded";

/// Error message for a cancelled run.
pub const CANCELLED_MESSAGE: &str = "Run cancelled by user";

/// The caller-facing output of a finished run, shaped by the template's
/// [`OutputMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutput {
    /// The last assistant text message.
    LastMessage {
        /// The message text.
        text: String,
    },
    /// The object recorded through `set_output`.
    StructuredOutput {
        /// The output value (`null` when never set).
        output: Value,
    },
    /// The history slice the run produced.
    AllMessages {
        /// The new messages, oldest first.
        messages: Vec<Message>,
    },
    /// The run terminated with an error.
    Error {
        /// The error message.
        message: String,
    },
}

impl RunOutput {
    /// Returns `true` for error outputs.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The error message, for error outputs.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// A finished run: terminal status, shaped output, and the final state.
#[derive(Debug)]
pub struct RunOutcome {
    /// Terminal status recorded with the persistence hooks.
    pub status: TerminalStatus,
    /// Output shaped by the template's output mode.
    pub output: RunOutput,
    /// Number of LLM steps the run performed.
    pub steps_taken: u64,
    /// The final agent state.
    pub state: AgentState,
}

/// What an inheriting child receives from its spawning parent.
#[derive(Debug, Clone)]
pub struct ParentContext {
    /// The parent's resolved system prompt, passed through byte-identical.
    pub system_prompt: String,
    /// The parent's resolved tool names.
    pub tool_names: Vec<String>,
}

/// Resolve an agent type and run it from a fresh state with the configured
/// default step budget.
pub async fn run_agent(
    env: &Arc<RunEnv>,
    agent_type: &str,
    prompt: impl Into<String>,
    signal: CancellationSignal,
) -> Result<RunOutcome> {
    let template = env.agents.resolve(agent_type, env.store.as_ref()).await?;
    let state = AgentState::new(template.id.clone(), env.config.default_steps);
    Ok(loop_agent_steps(
        Arc::clone(env),
        template,
        state,
        Some(prompt.into()),
        None,
        signal,
    )
    .await)
}

/// Run one agent to its terminal status.
///
/// Never panics and never returns an error: every failure mode is folded
/// into the outcome's status and output. On return, the generator registry
/// and proposed-content store hold no entries for this run.
pub async fn loop_agent_steps(
    env: Arc<RunEnv>,
    template: Arc<AgentTemplate>,
    mut state: AgentState,
    prompt: Option<String>,
    parent: Option<ParentContext>,
    signal: CancellationSignal,
) -> RunOutcome {
    // Inherited history ends where the spawner's synthetic messages begin;
    // everything from there on is this run's output.
    let mut history_start = state.message_history.len();
    while history_start > 0
        && state.message_history[history_start - 1].has_tag(MessageTag::SubagentSpawn)
    {
        history_start -= 1;
    }

    env.recorder
        .start_agent_run(RunStart {
            run_id: state.run_id.clone(),
            agent_id: state.agent_id.clone(),
            agent_type: state.agent_type.clone(),
            parent_id: state.parent_id.clone(),
        })
        .await;

    if signal.is_cancelled() {
        return finalize(&env, &template, state, history_start, 0, Err(Error::Cancelled)).await;
    }

    let (system_prompt, tool_names) = match resolve_inheritance(&template, parent) {
        Ok(resolved) => resolved,
        Err(err) => return finalize(&env, &template, state, history_start, 0, Err(err)).await,
    };
    let tool_set = env.tools.resolve(&tool_names);

    // A run starting from scratch materializes its system prompt as the
    // first history message; runs over inherited history keep the copied
    // lead and carry the prompt in the request only.
    if history_start == 0 && !system_prompt.is_empty() {
        state
            .message_history
            .insert(0, Message::system(system_prompt.clone()));
    }

    if let Some(prompt) = prompt {
        state.expire_user_prompt_messages();
        state.push_message(Message::user(prompt));
        if !template.instructions_prompt.is_empty() {
            state.push_message(Message::user(template.instructions_prompt.clone()).ephemeral());
        }
        if !template.step_prompt.is_empty() {
            state.push_message(Message::user(template.step_prompt.clone()).ephemeral());
        }
    }

    let span = info_span!(
        "agent",
        agent.template = %template.id,
        agent.model = %template.model,
        run.id = %state.run_id,
    );

    let mut steps_taken = 0u64;
    let result = {
        let mut scope = RunScope {
            env: &env,
            template: &template,
            tools: &tool_set,
            tool_names: &tool_names,
            system_prompt: &system_prompt,
            state: &mut state,
            signal: &signal,
            ordering: OrderingChain::new(),
        };
        drive_loop(&mut scope, &mut steps_taken).instrument(span).await
    };

    finalize(&env, &template, state, history_start, steps_taken, result).await
}

/// How the main loop ended, short of a hard error.
#[derive(Debug)]
enum TurnEnd {
    /// The turn ended normally.
    Ended,
    /// The step budget ran out first.
    Budget,
    /// The programmatic step generator raised.
    Failed(String),
}

async fn drive_loop(scope: &mut RunScope<'_>, steps_taken: &mut u64) -> Result<TurnEnd> {
    let template = Arc::clone(scope.template);
    let run_id = scope.state.run_id.clone();

    let mut last_ended = false;
    let mut pending_n: Option<Vec<String>> = None;
    let mut generator_active = template.has_handle_steps();

    loop {
        if scope.signal.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if scope.state.steps_remaining == 0 {
            return Ok(TurnEnd::Budget);
        }

        if generator_active {
            match run_programmatic_step(scope, last_ended, pending_n.take()).await? {
                ProgrammaticOutcome::EndTurn => {
                    generator_active = false;
                    if try_output_retry(scope, &template) {
                        last_ended = false;
                        continue;
                    }
                    return Ok(TurnEnd::Ended);
                }
                ProgrammaticOutcome::Failed(message) => return Ok(TurnEnd::Failed(message)),
                ProgrammaticOutcome::GenerateN(n) => {
                    let outcome = run_agent_step(scope, Some(n)).await?;
                    pending_n = outcome.n_responses;
                    continue;
                }
                ProgrammaticOutcome::RunLlmStep => {}
            }
        }

        let outcome = run_agent_step(scope, None).await?;
        *steps_taken += 1;
        scope
            .env
            .recorder
            .add_agent_step(&run_id, *steps_taken)
            .await;
        last_ended = outcome.should_end_turn && !outcome.had_tool_call_error;

        if last_ended {
            if generator_active {
                // The generator gets the final say on end-of-turn.
                continue;
            }
            if try_output_retry(scope, &template) {
                last_ended = false;
                continue;
            }
            return Ok(TurnEnd::Ended);
        }
        scope.state.steps_remaining -= 1;
    }
}

fn needs_output_retry(template: &AgentTemplate, state: &AgentState) -> bool {
    let Some(schema) = &template.output_schema else {
        return false;
    };
    match &state.output {
        Some(output) => schema.parse(output).is_err(),
        None => true,
    }
}

/// When the turn ended without valid output, consume budget and inject one
/// corrective user message. Returns `true` when the loop should run another
/// step; `false` finalizes the turn as-is (valid output, or nothing left to
/// retry with — the run then fails with its last output preserved).
fn try_output_retry(scope: &mut RunScope<'_>, template: &AgentTemplate) -> bool {
    if !needs_output_retry(template, scope.state) {
        return false;
    }
    if scope.state.steps_remaining == 0 {
        return false;
    }
    scope.state.steps_remaining -= 1;
    if scope.state.steps_remaining == 0 {
        return false;
    }
    debug!("turn ended without valid output; injecting corrective message");
    scope
        .state
        .push_message(Message::user(OUTPUT_RETRY_MESSAGE));
    true
}

fn resolve_inheritance(
    template: &AgentTemplate,
    parent: Option<ParentContext>,
) -> Result<(String, Vec<String>)> {
    if template.inherit_parent_system_prompt {
        let parent = parent.ok_or_else(|| {
            Error::Template(TemplateError::MissingParent(template.id.clone()))
        })?;
        Ok((parent.system_prompt, parent.tool_names))
    } else {
        Ok((
            template.system_prompt.clone(),
            template.tool_names.clone(),
        ))
    }
}

fn shape_output(template: &AgentTemplate, state: &AgentState, history_start: usize) -> RunOutput {
    match template.output_mode {
        OutputMode::LastMessage => RunOutput::LastMessage {
            text: state.last_assistant_text().unwrap_or_default(),
        },
        OutputMode::StructuredOutput => RunOutput::StructuredOutput {
            output: state.output.clone().unwrap_or(Value::Null),
        },
        OutputMode::AllMessages => RunOutput::AllMessages {
            messages: state
                .message_history
                .get(history_start..)
                .unwrap_or_default()
                .to_vec(),
        },
    }
}

async fn finalize(
    env: &Arc<RunEnv>,
    template: &AgentTemplate,
    mut state: AgentState,
    history_start: usize,
    steps_taken: u64,
    result: Result<TurnEnd>,
) -> RunOutcome {
    env.generators.remove(&state.run_id);
    env.proposed.clear(&state.run_id);

    let (status, output) = match result {
        Ok(TurnEnd::Ended) => {
            let valid = !needs_output_retry(template, &state);
            let output = shape_output(template, &state, history_start);
            let status = if valid {
                TerminalStatus::Completed
            } else {
                TerminalStatus::Failed
            };
            (status, output)
        }
        Ok(TurnEnd::Budget) => {
            state.push_message(Message::user(format!("Error: {BUDGET_EXCEEDED_MESSAGE}.")));
            (
                TerminalStatus::Failed,
                RunOutput::Error {
                    message: BUDGET_EXCEEDED_MESSAGE.to_owned(),
                },
            )
        }
        Ok(TurnEnd::Failed(message)) => (TerminalStatus::Failed, RunOutput::Error { message }),
        Err(Error::Cancelled) => (
            TerminalStatus::Cancelled,
            RunOutput::Error {
                message: CANCELLED_MESSAGE.to_owned(),
            },
        ),
        Err(err) => {
            error!(error = %err, run = %state.run_id, "agent run errored");
            (
                TerminalStatus::Failed,
                RunOutput::Error {
                    message: err.to_string(),
                },
            )
        }
    };

    if let RunOutput::Error { message } = &output {
        env.events.send_event(AgentEvent::new(
            state.agent_id.clone(),
            state.agent_type.clone(),
            state.parent_id.clone(),
            EventPayload::Error {
                message: message.clone(),
            },
        ));
    }

    info!(
        run = %state.run_id,
        agent = %state.agent_type,
        status = %status,
        steps = steps_taken,
        credits = state.credits_used,
        "agent run finished",
    );
    env.recorder.finish_agent_run(&state.run_id, status).await;

    RunOutcome {
        status,
        output,
        steps_taken,
        state,
    }
}
