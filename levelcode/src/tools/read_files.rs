//! Client-delegated file reads.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::message::ToolResultPart;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler};

/// Reads files from the user's machine through the client delegate.
///
/// The runtime has no filesystem access of its own; the delegate executes
/// the read on the client and streams the contents back. Each call charges
/// the configured direct-credit amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFilesTool;

#[async_trait]
impl ToolHandler for ReadFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "read_files",
            "Reads files from the user's workspace. Paths are relative to the workspace root.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["paths"]
            }),
        )
    }

    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        ctx.ensure_active()?;
        let parts = ctx
            .env
            .client_tools
            .request_client_tool(
                &ctx.state.run_id,
                "read_files",
                input,
                ctx.signal.clone(),
            )
            .await
            .map_err(ToolError::Execution)?;
        ctx.state
            .add_direct_credits(ctx.env.config.client_tool_credits);
        Ok(parts)
    }
}
