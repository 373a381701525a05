//! Turn-ending tool.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::message::ToolResultPart;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler};

/// Built-in tool the model calls to end its turn explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndTurnTool;

#[async_trait]
impl ToolHandler for EndTurnTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "end_turn",
            "Ends your turn. Call this when you are done responding.",
            serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        )
    }

    async fn call(
        &self,
        _input: Value,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<Vec<ToolResultPart>, ToolError> {
        Ok(vec![ToolResultPart::text("Turn ended.")])
    }

    fn ends_turn(&self) -> bool {
        true
    }
}
