//! A single LLM turn.
//!
//! [`run_agent_step`] assembles the request for one step, streams the
//! response through the embedded-call parser, and dispatches tool calls
//! strictly serially: one in-flight tool at a time, each awaited before the
//! next stream event is processed.

use futures::StreamExt;
use tracing::{debug, warn};

use crate::client::LlmRequest;
use crate::error::Error;
use crate::events::EventPayload;
use crate::message::{Message, Role};
use crate::retry::with_retries;
use crate::stream::{LlmChunk, ParsedEvent, StreamParser};

use super::RunScope;
use super::executor::execute_tool_call;

/// What one LLM step produced.
#[derive(Debug, Default)]
pub(crate) struct AgentStepOutcome {
    /// The model's turn is over: an `end_turn` handler ran, or the step
    /// produced neither a tool call nor a tool result.
    pub should_end_turn: bool,
    /// At least one tool call was rejected before execution.
    pub had_tool_call_error: bool,
    /// Responses from an `n`-shot completion, when requested.
    pub n_responses: Option<Vec<String>>,
}

/// Build the LLM request for the current history.
///
/// System-role messages stay out of the message list; the resolved system
/// prompt travels in its own field and is byte-identical across a parent and
/// its inheriting children.
fn build_request(scope: &RunScope<'_>) -> LlmRequest {
    LlmRequest {
        model: scope.template.model.clone(),
        system: scope.system_prompt.to_owned(),
        messages: scope
            .state
            .message_history
            .iter()
            .filter(|message| message.role != Role::System)
            .cloned()
            .collect(),
        tools: scope.tools.definitions(),
    }
}

/// Run one LLM step. With `n` set, performs an `n`-response non-streaming
/// completion instead and returns the responses without touching history.
pub(crate) async fn run_agent_step(
    scope: &mut RunScope<'_>,
    n: Option<usize>,
) -> Result<AgentStepOutcome, Error> {
    let request = build_request(scope);
    let retry = scope.env.config.retry.clone();

    if let Some(n) = n {
        debug!(n, model = %request.model, "n-shot completion");
        let llm = &scope.env.llm;
        let responses =
            with_retries(&retry, scope.signal, || llm.prompt(request.clone(), n)).await?;
        return Ok(AgentStepOutcome {
            n_responses: Some(responses),
            ..AgentStepOutcome::default()
        });
    }

    debug!(model = %request.model, messages = request.messages.len(), "streaming step");
    let mut stream = {
        let llm = &scope.env.llm;
        let signal = scope.signal;
        with_retries(&retry, signal, || {
            llm.prompt_stream(request.clone(), signal.clone())
        })
        .await?
    };

    let mut parser = StreamParser::new();
    let mut text_buffer = String::new();
    let mut any_tool_call = false;
    let mut any_tool_result = false;
    let mut ended_by_tool = false;
    let mut had_tool_call_error = false;
    let mut finished = false;
    let mut usage = None;

    while let Some(chunk) = stream.next().await {
        if scope.signal.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let events = match chunk? {
            LlmChunk::Text(text) => parser.push_text(&text),
            LlmChunk::ToolCall(call) => parser.push_tool_call(call),
            LlmChunk::Done {
                aborted,
                usage: done_usage,
                ..
            } => {
                finished = true;
                usage = done_usage;
                if aborted && scope.signal.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                parser.finish()
            }
        };

        for event in events {
            match event {
                ParsedEvent::Text(text) => {
                    scope.emit(EventPayload::Text { text: text.clone() });
                    text_buffer.push_str(&text);
                }
                ParsedEvent::ToolCall(call) => {
                    flush_text(scope, &mut text_buffer);
                    let outcome = execute_tool_call(&call, true, scope).await?;
                    any_tool_call |= outcome.recorded_call;
                    any_tool_result |= outcome.recorded_result;
                    ended_by_tool |= outcome.ended_turn;
                    had_tool_call_error |= outcome.had_error;
                }
                ParsedEvent::Invalid { tag, message } => {
                    warn!(%tag, %message, "discarding malformed embedded tool call");
                }
            }
        }
    }

    if !finished {
        for event in parser.finish() {
            if let ParsedEvent::Text(text) = event {
                scope.emit(EventPayload::Text { text: text.clone() });
                text_buffer.push_str(&text);
            }
        }
    }
    flush_text(scope, &mut text_buffer);

    if let Some(usage) = usage {
        let credits = usage.credits();
        if credits > 0 {
            scope.state.add_credits(credits);
            scope
                .env
                .credits
                .consume_credits(&scope.state.run_id, credits)
                .await
                .map_err(Error::Credits)?;
        }
    }

    Ok(AgentStepOutcome {
        should_end_turn: ended_by_tool || (!any_tool_call && !any_tool_result),
        had_tool_call_error,
        n_responses: None,
    })
}

/// Record accumulated assistant text as one history message.
fn flush_text(scope: &mut RunScope<'_>, buffer: &mut String) {
    if !buffer.is_empty() {
        let text = std::mem::take(buffer);
        scope.state.push_message(Message::assistant(text));
    }
}
