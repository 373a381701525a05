//! Streaming chunk types and the embedded tool-call parser.
//!
//! The LLM client yields [`LlmChunk`]s: text deltas, structured tool calls,
//! and a terminal marker. [`StreamParser`] canonicalizes that sequence into
//! [`ParsedEvent`]s, additionally recognizing tool calls embedded in text as
//! a sentinel-tagged JSON envelope:
//!
//! ```text
//! <levelcode_tool_call>{"cb_tool_name":"read_files","paths":["a.txt"]}</levelcode_tool_call>
//! ```
//!
//! Parsing is incremental: a partial opener at the end of a chunk is held
//! back (at most the opener's length) until later text completes or breaks
//! the match. Text strictly before a recognized call is always flushed ahead
//! of the call event, so a consumer that awaits call execution before
//! pulling further events observes history order.

use serde_json::Value;
use uuid::Uuid;

use crate::client::Usage;
use crate::message::ToolCall;

/// Opening sentinel for a tool call embedded in text.
pub const EMBEDDED_CALL_OPEN: &str = "<levelcode_tool_call>";
/// Closing sentinel for a tool call embedded in text.
pub const EMBEDDED_CALL_CLOSE: &str = "</levelcode_tool_call>";
/// JSON field naming the tool inside the envelope.
pub const EMBEDDED_NAME_FIELD: &str = "cb_tool_name";
/// Prefix of tool-call ids minted for embedded calls.
pub const EMBEDDED_ID_PREFIX: &str = "xml-";

/// One chunk of an LLM response stream.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LlmChunk {
    /// A text delta.
    Text(String),
    /// A structured tool call.
    ToolCall(ToolCall),
    /// Terminal marker carried by every completed stream.
    Done {
        /// `true` when the provider aborted the response.
        aborted: bool,
        /// Provider-assigned message id, when available.
        message_id: Option<String>,
        /// Token usage for the call, when available.
        usage: Option<Usage>,
    },
}

impl LlmChunk {
    /// Create a text chunk.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a terminal chunk with no metadata.
    #[must_use]
    pub const fn done() -> Self {
        Self::Done {
            aborted: false,
            message_id: None,
            usage: None,
        }
    }
}

/// A canonical event produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Visible text, in stream order.
    Text(String),
    /// A tool call, structured or recognized in text.
    ToolCall(ToolCall),
    /// An embedded envelope whose body failed to parse. The consumer logs
    /// the failure; the enclosing text is discarded.
    Invalid {
        /// The tag that failed (always the embedded-call sentinel today).
        tag: String,
        /// Why the body was rejected.
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Emitting text, holding back at most one partial opener.
    Scanning,
    /// Accumulating an envelope body until the closer appears.
    InsideTag,
}

/// Incremental parser for text streams carrying embedded tool calls.
///
/// A pure state machine: feed chunks with [`push_text`](Self::push_text) /
/// [`push_tool_call`](Self::push_tool_call), collect events, and call
/// [`finish`](Self::finish) when the stream ends.
#[derive(Debug)]
pub struct StreamParser {
    state: ParseState,
    /// Unemitted text while scanning; always a (possibly empty) suffix that
    /// is a prefix of the opener.
    held: String,
    /// Envelope body accumulated while inside a tag.
    body: String,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Create a parser at the start of a stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParseState::Scanning,
            held: String::new(),
            body: String::new(),
        }
    }

    /// Feed a text chunk; returns the events it completes.
    pub fn push_text(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        match self.state {
            ParseState::Scanning => self.held.push_str(chunk),
            ParseState::InsideTag => self.body.push_str(chunk),
        }
        self.drain()
    }

    /// Feed a structured tool call; pending text is flushed ahead of it.
    pub fn push_tool_call(&mut self, call: ToolCall) -> Vec<ParsedEvent> {
        let mut events = self.flush_pending_as_text();
        events.push(ParsedEvent::ToolCall(call));
        events
    }

    /// Signal end of stream, flushing whatever is held.
    ///
    /// An unterminated envelope is reported as [`ParsedEvent::Invalid`] and
    /// its text discarded.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        match self.state {
            ParseState::Scanning => {
                let mut events = Vec::new();
                if !self.held.is_empty() {
                    events.push(ParsedEvent::Text(std::mem::take(&mut self.held)));
                }
                events
            }
            ParseState::InsideTag => {
                self.body.clear();
                self.state = ParseState::Scanning;
                vec![ParsedEvent::Invalid {
                    tag: EMBEDDED_CALL_OPEN.to_owned(),
                    message: "unterminated tool call tag at end of stream".to_owned(),
                }]
            }
        }
    }

    fn drain(&mut self) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        loop {
            match self.state {
                ParseState::Scanning => {
                    if let Some(idx) = self.held.find(EMBEDDED_CALL_OPEN) {
                        if idx > 0 {
                            events.push(ParsedEvent::Text(self.held[..idx].to_owned()));
                        }
                        self.body = self.held[idx + EMBEDDED_CALL_OPEN.len()..].to_owned();
                        self.held.clear();
                        self.state = ParseState::InsideTag;
                    } else {
                        let keep = partial_marker_suffix(&self.held, EMBEDDED_CALL_OPEN);
                        let emit = self.held.len() - keep;
                        if emit > 0 {
                            let text: String = self.held.drain(..emit).collect();
                            events.push(ParsedEvent::Text(text));
                        }
                        return events;
                    }
                }
                ParseState::InsideTag => {
                    if let Some(idx) = self.body.find(EMBEDDED_CALL_CLOSE) {
                        let rest = self.body[idx + EMBEDDED_CALL_CLOSE.len()..].to_owned();
                        let source: String = self.body.drain(..idx).collect();
                        events.push(parse_envelope(&source));
                        self.body.clear();
                        self.held = rest;
                        self.state = ParseState::Scanning;
                    } else {
                        return events;
                    }
                }
            }
        }
    }

    /// Flush held text (or a half-open tag, re-rendered as text) as plain
    /// text events.
    fn flush_pending_as_text(&mut self) -> Vec<ParsedEvent> {
        let mut text = String::new();
        if self.state == ParseState::InsideTag {
            text.push_str(EMBEDDED_CALL_OPEN);
            text.push_str(&self.body);
            self.body.clear();
            self.state = ParseState::Scanning;
        }
        text.push_str(&self.held);
        self.held.clear();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![ParsedEvent::Text(text)]
        }
    }
}

/// Longest suffix of `text` that is a proper prefix of `marker`, respecting
/// char boundaries. Bounds the lookahead buffer to the marker length.
fn partial_marker_suffix(text: &str, marker: &str) -> usize {
    let max = text.len().min(marker.len() - 1);
    for keep in (1..=max).rev() {
        let start = text.len() - keep;
        if text.is_char_boundary(start) && marker.starts_with(&text[start..]) {
            return keep;
        }
    }
    0
}

/// Parse one envelope body into a tool-call event.
fn parse_envelope(source: &str) -> ParsedEvent {
    let trimmed = source.trim();
    let parsed: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            return ParsedEvent::Invalid {
                tag: EMBEDDED_CALL_OPEN.to_owned(),
                message: format!("invalid JSON in tool call tag: {err}"),
            };
        }
    };
    let Value::Object(mut fields) = parsed else {
        return ParsedEvent::Invalid {
            tag: EMBEDDED_CALL_OPEN.to_owned(),
            message: "tool call tag must contain a JSON object".to_owned(),
        };
    };
    let Some(Value::String(tool_name)) = fields.remove(EMBEDDED_NAME_FIELD) else {
        return ParsedEvent::Invalid {
            tag: EMBEDDED_CALL_OPEN.to_owned(),
            message: format!("tool call tag is missing a string `{EMBEDDED_NAME_FIELD}` field"),
        };
    };
    ParsedEvent::ToolCall(ToolCall::new(
        format!("{EMBEDDED_ID_PREFIX}{}", Uuid::new_v4()),
        tool_name,
        Value::Object(fields),
    ))
}

/// Render a tool call in the embedded envelope form.
///
/// The inverse of recognition: feeding the result back through a parser
/// yields an equivalent tool-call event.
#[must_use]
pub fn embed_tool_call(tool_name: &str, input: &Value) -> String {
    let mut fields = serde_json::Map::new();
    fields.insert(
        EMBEDDED_NAME_FIELD.to_owned(),
        Value::String(tool_name.to_owned()),
    );
    if let Some(object) = input.as_object() {
        for (key, value) in object {
            fields.insert(key.clone(), value.clone());
        }
    }
    format!(
        "{EMBEDDED_CALL_OPEN}{}{EMBEDDED_CALL_CLOSE}",
        Value::Object(fields)
    )
}
