//! Driving a template's programmatic step generator.
//!
//! [`run_programmatic_step`] resumes the run's generator and services its
//! directives: tool invocations execute inline (one at a time, through the
//! executor), `STEP` / `STEP_ALL` / `GENERATE_N` hand control back to the
//! loop controller, and `STEP_TEXT` routes text through the stream parser
//! as if the model had produced it.
//!
//! While the run's `STEP_ALL` flag is set, re-entry short-circuits into
//! another LLM step until the model ends its turn; only then is the
//! generator resumed.

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::events::EventPayload;
use crate::generator::{
    AgentSnapshot, GeneratorHandle, GeneratorStep, StepDirective, StepResume,
};
use crate::message::{Message, ToolCall, ToolResultPart};
use crate::stream::{ParsedEvent, StreamParser};

use super::RunScope;
use super::executor::execute_tool_call;

/// What the programmatic step asks the loop controller to do.
#[derive(Debug)]
pub(crate) enum ProgrammaticOutcome {
    /// The generator returned; the turn is over.
    EndTurn,
    /// The generator raised; `output.error` is set and the run fails.
    Failed(String),
    /// Run one LLM step (a `STEP` yield, or `STEP_ALL` still draining).
    RunLlmStep,
    /// Run an `n`-response completion and feed the responses back in.
    GenerateN(usize),
}

/// Resume the run's generator with the latest loop state.
pub(crate) async fn run_programmatic_step(
    scope: &mut RunScope<'_>,
    steps_complete: bool,
    n_responses: Option<Vec<String>>,
) -> Result<ProgrammaticOutcome, Error> {
    let run_id = scope.state.run_id.clone();
    let generators = &scope.env.generators;

    if generators.in_step_all(&run_id) {
        if !steps_complete {
            return Ok(ProgrammaticOutcome::RunLlmStep);
        }
        generators.clear_step_all(&run_id);
    }

    let mut handle = match scope.env.generators.take(&run_id) {
        Some(handle) => handle,
        None => {
            let program = scope
                .template
                .handle_steps
                .clone()
                .ok_or_else(|| Error::internal("programmatic step on template without one"))?;
            GeneratorHandle::spawn(program).map_err(Error::Internal)?
        }
    };

    let mut resume = StepResume {
        agent_state: AgentSnapshot::of(scope.state),
        tool_result: None,
        steps_complete,
        n_responses,
    };

    loop {
        if scope.signal.is_cancelled() {
            scope.env.generators.restore(&run_id, handle);
            return Err(Error::Cancelled);
        }

        match handle.resume(resume).await {
            GeneratorStep::Finished(Ok(())) => {
                debug!(%run_id, "step generator returned");
                handle.abort();
                return Ok(ProgrammaticOutcome::EndTurn);
            }
            GeneratorStep::Finished(Err(message)) => {
                warn!(%run_id, error = %message, "step generator failed");
                scope
                    .state
                    .push_message(Message::assistant(format!("Error in step handler: {message}")));
                scope.state.set_output_field("error", json!(message));
                handle.abort();
                return Ok(ProgrammaticOutcome::Failed(message));
            }
            GeneratorStep::Yielded(StepDirective::Step) => {
                scope.env.generators.restore(&run_id, handle);
                return Ok(ProgrammaticOutcome::RunLlmStep);
            }
            GeneratorStep::Yielded(StepDirective::StepAll) => {
                scope.env.generators.set_step_all(&run_id);
                scope.env.generators.restore(&run_id, handle);
                return Ok(ProgrammaticOutcome::RunLlmStep);
            }
            GeneratorStep::Yielded(StepDirective::GenerateN { n }) => {
                scope.env.generators.restore(&run_id, handle);
                return Ok(ProgrammaticOutcome::GenerateN(n));
            }
            GeneratorStep::Yielded(StepDirective::Tool {
                tool_name,
                input,
                include_tool_call,
            }) => {
                let call = ToolCall::new(
                    format!("prog-{}", Uuid::new_v4()),
                    tool_name,
                    input,
                );
                let outcome = match execute_tool_call(&call, include_tool_call, scope).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        scope.env.generators.restore(&run_id, handle);
                        return Err(err);
                    }
                };
                resume = StepResume {
                    agent_state: AgentSnapshot::of(scope.state),
                    tool_result: Some(outcome.result),
                    steps_complete,
                    n_responses: None,
                };
            }
            GeneratorStep::Yielded(StepDirective::StepText { text }) => {
                let last_result = match record_step_text(scope, &text).await {
                    Ok(last_result) => last_result,
                    Err(err) => {
                        scope.env.generators.restore(&run_id, handle);
                        return Err(err);
                    }
                };
                resume = StepResume {
                    agent_state: AgentSnapshot::of(scope.state),
                    tool_result: last_result,
                    steps_complete,
                    n_responses: None,
                };
            }
        }
    }
}

/// Record generator-authored text as assistant output, executing any
/// embedded tool calls exactly as if the model had streamed them.
async fn record_step_text(
    scope: &mut RunScope<'_>,
    text: &str,
) -> Result<Option<Vec<ToolResultPart>>, Error> {
    let mut parser = StreamParser::new();
    let mut events = parser.push_text(text);
    events.extend(parser.finish());

    let mut buffer = String::new();
    let mut last_result = None;
    for event in events {
        match event {
            ParsedEvent::Text(text) => {
                scope.emit(EventPayload::Text { text: text.clone() });
                buffer.push_str(&text);
            }
            ParsedEvent::ToolCall(call) => {
                if !buffer.is_empty() {
                    let text = std::mem::take(&mut buffer);
                    scope.state.push_message(Message::assistant(text));
                }
                let outcome = execute_tool_call(&call, true, scope).await?;
                last_result = Some(outcome.result);
            }
            ParsedEvent::Invalid { tag, message } => {
                warn!(%tag, %message, "discarding malformed embedded tool call in step text");
            }
        }
    }
    if !buffer.is_empty() {
        scope.state.push_message(Message::assistant(buffer));
    }
    Ok(last_result)
}
