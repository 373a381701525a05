//! Message types for agent conversations.
//!
//! A [`Message`] is a role-tagged, ordered list of [`ContentPart`]s. The
//! runtime appends messages in the exact chronological order events were
//! accepted, and every assistant tool-call part is eventually paired with a
//! `tool` message carrying the matching `tool_call_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A request to invoke a named capability with structured input.
///
/// Produced either by the model (streamed, or embedded in text) or by a
/// programmatic step. `tool_call_id` is unique within an agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call within the run.
    pub tool_call_id: String,
    /// Name of the tool being invoked.
    pub tool_name: String,
    /// Structured input for the tool.
    pub input: Value,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// One element of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// Structured JSON output.
    Json {
        /// The JSON value.
        value: Value,
    },
}

impl ToolResultPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a JSON part.
    #[must_use]
    pub const fn json(value: Value) -> Self {
        Self::Json { value }
    }

    /// Get the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Json { .. } => None,
        }
    }

    /// Build the conventional error body for a failed-but-valid tool call.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Json {
            value: serde_json::json!({ "errorMessage": message.into() }),
        }
    }
}

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Visible text.
    Text {
        /// The text content.
        text: String,
    },
    /// An assistant tool call.
    ToolCall {
        /// The call being made.
        #[serde(flatten)]
        call: ToolCall,
    },
    /// A tool result paired to a prior tool call.
    ToolResult {
        /// Id of the tool call this result answers.
        tool_call_id: String,
        /// Name of the tool that produced the output.
        tool_name: String,
        /// Ordered output parts.
        output: Vec<ToolResultPart>,
    },
}

impl ContentPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the tool call if this is a tool-call part.
    #[must_use]
    pub const fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall { call } => Some(call),
            _ => None,
        }
    }
}

/// Retention tag for ephemeral messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeToLive {
    /// Dropped when the next user prompt arrives.
    UserPrompt,
}

/// Marker tags attached to messages for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageTag {
    /// The synthetic user message appended when a subagent is spawned.
    SubagentSpawn,
}

/// A message in an agent's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the sender.
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
    /// Optional retention tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<TimeToLive>,
    /// Marker tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<MessageTag>,
}

impl Message {
    /// Create a message with a single text part.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            time_to_live: None,
            tags: Vec::new(),
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant text message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create an assistant message carrying a single tool call.
    #[must_use]
    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall { call }],
            time_to_live: None,
            tags: Vec::new(),
        }
    }

    /// Create a tool message answering a prior tool call.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Vec<ToolResultPart>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                tool_name: tool_name.into(),
                output,
            }],
            time_to_live: None,
            tags: Vec::new(),
        }
    }

    /// Tag the message as dropped on the next user prompt.
    #[must_use]
    pub const fn ephemeral(mut self) -> Self {
        self.time_to_live = Some(TimeToLive::UserPrompt);
        self
    }

    /// Attach a marker tag.
    #[must_use]
    pub fn tagged(mut self, tag: MessageTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Concatenated text content of the message, if any.
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        let text: Vec<&str> = self
            .content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }

    /// Returns `true` if any content part is a tool call.
    #[must_use]
    pub fn has_tool_call(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall { .. }))
    }

    /// Returns `true` if this message is dropped when the next user prompt
    /// arrives.
    #[must_use]
    pub fn expires_on_user_prompt(&self) -> bool {
        self.time_to_live == Some(TimeToLive::UserPrompt)
    }

    /// Returns `true` if the message carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: MessageTag) -> bool {
        self.tags.contains(&tag)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    mod construction {
        use super::*;

        #[test]
        fn user_message_has_text_part() {
            let msg = Message::user("hello");
            assert_eq!(msg.role, Role::User);
            assert_eq!(msg.text_content(), Some("hello".to_owned()));
        }

        #[test]
        fn assistant_tool_call_message() {
            let call = ToolCall::new("tc-1", "read_files", serde_json::json!({"paths": []}));
            let msg = Message::assistant_tool_call(call);
            assert!(msg.has_tool_call());
            assert!(msg.text_content().is_none());
        }

        #[test]
        fn tool_result_message_pairs_id() {
            let msg = Message::tool_result("tc-1", "read_files", vec![ToolResultPart::text("ok")]);
            assert_eq!(msg.role, Role::Tool);
            match &msg.content[0] {
                ContentPart::ToolResult { tool_call_id, .. } => assert_eq!(tool_call_id, "tc-1"),
                other => panic!("unexpected part: {other:?}"),
            }
        }

        #[test]
        fn ephemeral_sets_ttl() {
            let msg = Message::user("step hint").ephemeral();
            assert!(msg.expires_on_user_prompt());
        }

        #[test]
        fn tagged_adds_marker() {
            let msg = Message::user("spawned").tagged(MessageTag::SubagentSpawn);
            assert!(msg.has_tag(MessageTag::SubagentSpawn));
        }
    }

    mod parts {
        use super::*;

        #[test]
        fn result_part_error_body() {
            let part = ToolResultPart::error("boom");
            match part {
                ToolResultPart::Json { value } => {
                    assert_eq!(value["errorMessage"], "boom");
                }
                ToolResultPart::Text { .. } => panic!("expected json part"),
            }
        }

        #[test]
        fn text_content_joins_parts() {
            let msg = Message {
                role: Role::Assistant,
                content: vec![ContentPart::text("a"), ContentPart::text("b")],
                time_to_live: None,
                tags: Vec::new(),
            };
            assert_eq!(msg.text_content(), Some("a\nb".to_owned()));
        }
    }

    mod serde_format {
        use super::*;

        #[test]
        fn role_serializes_lowercase() {
            assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
        }

        #[test]
        fn ttl_serializes_camel_case() {
            assert_eq!(
                serde_json::to_string(&TimeToLive::UserPrompt).unwrap(),
                r#""userPrompt""#
            );
        }

        #[test]
        fn tag_serializes_screaming() {
            assert_eq!(
                serde_json::to_string(&MessageTag::SubagentSpawn).unwrap(),
                r#""SUBAGENT_SPAWN""#
            );
        }

        #[test]
        fn message_roundtrip() {
            let msg = Message::tool_result(
                "tc-9",
                "set_output",
                vec![
                    ToolResultPart::text("done"),
                    ToolResultPart::json(serde_json::json!({"ok": true})),
                ],
            );
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, msg);
        }

        #[test]
        fn tool_call_part_flattens_call() {
            let call = ToolCall::new("tc-2", "end_turn", serde_json::json!({}));
            let part = ContentPart::ToolCall { call };
            let json = serde_json::to_value(&part).unwrap();
            assert_eq!(json["type"], "tool_call");
            assert_eq!(json["tool_call_id"], "tc-2");
            assert_eq!(json["tool_name"], "end_turn");
        }
    }
}
