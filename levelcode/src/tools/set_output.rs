//! Output-recording tool.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::message::ToolResultPart;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler};

/// Built-in tool recording the run's structured output.
///
/// The input object becomes the agent's `output`. When the template declares
/// an output schema, the input must satisfy it; a mismatch fails the call so
/// the model can correct itself without the loop ending.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOutputTool;

#[async_trait]
impl ToolHandler for SetOutputTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "set_output",
            "Records the structured output of this run. The input object is the output.",
            serde_json::json!({
                "type": "object"
            }),
        )
    }

    async fn call(
        &self,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        if let Some(schema) = &ctx.template.output_schema {
            schema
                .parse(&input)
                .map_err(|err| ToolError::invalid_arguments(err.to_string()))?;
        }
        ctx.state.output = Some(input);
        Ok(vec![ToolResultPart::text("Output recorded.")])
    }
}
