//! Error types for the levelcode runtime.
//!
//! Errors fall into two families. *Local* errors (tool failures, invalid tool
//! input, programmatic step exceptions) are captured by the loop and surfaced
//! to the model as data — they never unwind a run. *Global* errors
//! (cancellation, step budget exhaustion, credit rejection, exhausted LLM
//! retries) terminate the owning agent state with a terminal status.

use thiserror::Error;

use crate::registry::IdParseError;
use crate::schema::SchemaError;
use crate::template::TemplateError;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for run execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The run was cancelled through its [`CancellationSignal`](crate::cancel::CancellationSignal).
    #[error("Run cancelled by user")]
    Cancelled,

    /// The step budget reached zero before the turn ended.
    #[error("Step budget exceeded")]
    StepBudgetExceeded,

    /// An LLM transport error that survived the retry policy.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The credit sink rejected a deduction.
    #[error("credit deduction rejected: {0}")]
    Credits(String),

    /// An agent id could not be resolved to a template.
    #[error("unknown agent type: {0}")]
    UnknownAgent(String),

    /// An agent id failed to parse.
    #[error(transparent)]
    InvalidAgentId(#[from] IdParseError),

    /// A template failed validation.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised by tool handlers and tool dispatch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No handler is registered under the requested name.
    #[error("no such tool: {0}")]
    NotFound(String),

    /// The call input did not satisfy the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Execution(String),

    /// The handler observed the cancellation signal mid-execution.
    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}

impl From<SchemaError> for ToolError {
    fn from(err: SchemaError) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors from the external LLM client.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// The provider answered with a non-success status code.
    #[error("provider returned status {status}: {message}")]
    Status {
        /// HTTP-style status code.
        status: u16,
        /// Provider-supplied detail.
        message: String,
    },

    /// The request never reached the provider.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call observed the cancellation signal.
    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_display_is_user_facing() {
        assert_eq!(Error::Cancelled.to_string(), "Run cancelled by user");
    }

    #[test]
    fn budget_display_is_user_facing() {
        assert_eq!(
            Error::StepBudgetExceeded.to_string(),
            "Step budget exceeded"
        );
    }

    #[test]
    fn is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::StepBudgetExceeded.is_cancelled());
    }

    #[test]
    fn tool_error_from_schema_error() {
        let err = SchemaError::mismatch("input", "expected object");
        let tool_err: ToolError = err.into();
        assert!(matches!(tool_err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn llm_error_display() {
        let err = LlmError::Status {
            status: 429,
            message: "rate limited".to_owned(),
        };
        assert!(err.to_string().contains("429"));
    }
}
