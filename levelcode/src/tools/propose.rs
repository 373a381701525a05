//! Proposed file edits.
//!
//! These tools never touch the user's disk. Edits are staged in the per-run
//! proposed-content overlay; the embedding application decides what to do
//! with the staged contents when the run finishes. Both tools are writers
//! and await the previous call's completion before mutating the overlay.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ToolError;
use crate::message::ToolResultPart;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler};

/// Stage full proposed content for a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposeWriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolHandler for ProposeWriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "propose_write_file",
            "Proposes writing a file. The content is staged for review, not written to disk.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        let args: WriteFileArgs = serde_json::from_value(input)?;
        std::mem::take(&mut ctx.previous_call_finished).wait().await;
        ctx.ensure_active()?;
        ctx.env
            .proposed
            .propose(&ctx.state.run_id, &args.path, args.content);
        Ok(vec![ToolResultPart::text(format!(
            "Proposed write to {}.",
            args.path
        ))])
    }
}

/// Stage a single-occurrence text replacement in a file.
///
/// The old text must appear exactly once in the current proposed content
/// (or, when nothing is staged yet, in the file as read from the client).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposeStrReplaceTool;

#[derive(Debug, Deserialize)]
struct StrReplaceArgs {
    path: String,
    old: String,
    new: String,
}

#[async_trait]
impl ToolHandler for ProposeStrReplaceTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "propose_str_replace",
            "Proposes replacing text in a file. The old text must appear exactly once.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "old": { "type": "string" },
                    "new": { "type": "string" }
                },
                "required": ["path", "old", "new"]
            }),
        )
    }

    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        let args: StrReplaceArgs = serde_json::from_value(input)?;
        std::mem::take(&mut ctx.previous_call_finished).wait().await;
        ctx.ensure_active()?;

        let base = match ctx.env.proposed.get(&ctx.state.run_id, &args.path) {
            Some(staged) => staged,
            None => read_from_client(ctx, &args.path).await?,
        };

        let occurrences = base.matches(&args.old).count();
        if occurrences == 0 {
            return Err(ToolError::execution(format!(
                "old text not found in {}",
                args.path
            )));
        }
        if occurrences > 1 {
            return Err(ToolError::execution(format!(
                "old text appears {occurrences} times in {}; it must be unique",
                args.path
            )));
        }

        let updated = base.replacen(&args.old, &args.new, 1);
        ctx.env
            .proposed
            .propose(&ctx.state.run_id, &args.path, updated);
        Ok(vec![ToolResultPart::text(format!(
            "Proposed replacement in {}.",
            args.path
        ))])
    }
}

/// Fetch a file's current content through the client delegate.
async fn read_from_client(ctx: &mut ToolContext<'_>, path: &str) -> Result<String, ToolError> {
    let parts = ctx
        .env
        .client_tools
        .request_client_tool(
            &ctx.state.run_id,
            "read_files",
            serde_json::json!({ "paths": [path] }),
            ctx.signal.clone(),
        )
        .await
        .map_err(ToolError::Execution)?;
    ctx.state
        .add_direct_credits(ctx.env.config.client_tool_credits);

    for part in parts {
        if let ToolResultPart::Json { value } = part {
            if let Some(error) = value.get("errorMessage").and_then(Value::as_str) {
                return Err(ToolError::execution(format!("{path}: {error}")));
            }
            if let Some(content) = value.get("content").and_then(Value::as_str) {
                return Ok(content.to_owned());
            }
        }
    }
    Err(ToolError::execution(format!(
        "client returned no content for {path}"
    )))
}
