//! Tool call execution.
//!
//! One entry point, [`execute_tool_call`], owns the pairing discipline of
//! the message history:
//!
//! - unknown tool or schema-invalid input → a user-role error message is
//!   appended and *neither* the assistant tool-call part nor a tool result
//!   is recorded (an orphan tool result would break subsequent LLM calls);
//! - handler success → assistant tool-call message, then the paired `tool`
//!   message with the handler's output;
//! - handler failure → the pairing is preserved, with an `errorMessage`
//!   body the model can observe and react to.

use std::sync::Arc;

use tracing::{Instrument, info_span, warn};

use crate::error::{Error, ToolError};
use crate::events::EventPayload;
use crate::message::{Message, ToolCall, ToolResultPart};
use crate::schema::validate_value;
use crate::tool::ToolContext;

use super::RunScope;

/// What one dispatched tool call did.
#[derive(Debug, Default)]
pub(crate) struct ToolOutcome {
    /// The call was rejected before any history mutation.
    pub had_error: bool,
    /// An assistant tool-call part was appended.
    pub recorded_call: bool,
    /// A paired tool message was appended.
    pub recorded_result: bool,
    /// The handler ran successfully and ends the turn.
    pub ended_turn: bool,
    /// The handler's output (or error body), also for unrecorded calls.
    pub result: Vec<ToolResultPart>,
}

/// Execute one tool call against the run scope.
///
/// With `record` false the call runs without touching the message history
/// or the event stream (programmatic `include_tool_call: false`); rejection
/// errors then flow back to the caller as result parts instead of injected
/// messages.
pub(crate) async fn execute_tool_call(
    call: &ToolCall,
    record: bool,
    scope: &mut RunScope<'_>,
) -> Result<ToolOutcome, Error> {
    if scope.signal.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let Some(handler) = scope.tools.get(&call.tool_name).map(Arc::clone) else {
        warn!(tool = %call.tool_name, "tool call names no registered tool");
        let message = format!("Error during tool call: no such tool: {}", call.tool_name);
        if record {
            scope.state.push_message(Message::user(message.clone()));
        }
        return Ok(ToolOutcome {
            had_error: true,
            result: vec![ToolResultPart::error(message)],
            ..ToolOutcome::default()
        });
    };

    let definition = handler.definition();
    if let Err(err) = validate_value(&definition.parameters, &call.input, "input") {
        warn!(tool = %call.tool_name, error = %err, "tool input rejected");
        let message = format!("Invalid parameters for {}: {err}", call.tool_name);
        if record {
            scope.state.push_message(Message::user(message.clone()));
        }
        return Ok(ToolOutcome {
            had_error: true,
            result: vec![ToolResultPart::error(message)],
            ..ToolOutcome::default()
        });
    }

    if record {
        scope
            .state
            .push_message(Message::assistant_tool_call(call.clone()));
        scope.emit(EventPayload::ToolCall {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
        });
    }

    let span = info_span!(
        "tool",
        tool.name = %call.tool_name,
        tool.id = %call.tool_call_id,
        tool.success = tracing::field::Empty,
    );

    let (previous, completion) = scope.ordering.begin();
    let result = {
        let mut ctx = ToolContext {
            state: &mut *scope.state,
            template: scope.template.as_ref(),
            env: scope.env,
            signal: scope.signal,
            system_prompt: scope.system_prompt,
            tool_names: scope.tool_names,
            previous_call_finished: previous,
        };
        handler
            .call(call.input.clone(), &mut ctx)
            .instrument(span.clone())
            .await
    };

    let outcome = match result {
        Ok(parts) => {
            span.record("tool.success", true);
            if record {
                scope.state.push_message(Message::tool_result(
                    &call.tool_call_id,
                    &call.tool_name,
                    parts.clone(),
                ));
                scope.emit(EventPayload::ToolResult {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    output: parts.clone(),
                });
            }
            Ok(ToolOutcome {
                recorded_call: record,
                recorded_result: record,
                ended_turn: handler.ends_turn(),
                result: parts,
                ..ToolOutcome::default()
            })
        }
        Err(ToolError::Cancelled) => Err(Error::Cancelled),
        Err(err) => {
            span.record("tool.success", false);
            warn!(tool = %call.tool_name, error = %err, "tool execution failed");
            let parts = vec![ToolResultPart::error(err.to_string())];
            if record {
                scope.state.push_message(Message::tool_result(
                    &call.tool_call_id,
                    &call.tool_name,
                    parts.clone(),
                ));
                scope.emit(EventPayload::ToolResult {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    output: parts.clone(),
                });
            }
            Ok(ToolOutcome {
                recorded_call: record,
                recorded_result: record,
                result: parts,
                ..ToolOutcome::default()
            })
        }
    };
    completion.finish();
    outcome
}
