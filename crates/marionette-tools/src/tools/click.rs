use async_trait::async_trait;
use marionette_core::{Parameters, ToolError, ToolResult};

use super::{connect, instance_id_schema, send_command};
use crate::tool::{Tool, ToolContext};

/// Tap a point on the instance's screen.
pub struct ClickTool;

#[async_trait]
impl Tool for ClickTool {
    fn name(&self) -> &str {
        "click"
    }

    fn description(&self) -> &str {
        "Click at a screen coordinate on an instance"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id", "x", "y"],
            "properties": {
                "instance_id": instance_id_schema(),
                "x": { "type": "number" },
                "y": { "type": "number" }
            }
        })
    }

    async fn execute(
        &self,
        params: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let instance_id = params.instance_id()?;
        let x: f64 = params.require("x")?;
        let y: f64 = params.require("y")?;

        let link = connect(ctx, &instance_id).await?;
        send_command(
            &link,
            &serde_json::json!({ "command": "click", "x": x, "y": y }),
        )
        .await?;

        Ok(ToolResult::from_json(serde_json::json!({
            "instance_id": instance_id.as_str(),
            "command": "click",
            "x": x,
            "y": y,
        })))
    }
}
