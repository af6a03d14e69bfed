use async_trait::async_trait;
use marionette_core::{ParamError, Parameters, ToolError, ToolResult};

use super::{connect, instance_id_schema, send_command};
use crate::tool::{Tool, ToolContext};

/// Type text into the focused field.
pub struct InputTool;

#[async_trait]
impl Tool for InputTool {
    fn name(&self) -> &str {
        "input"
    }

    fn description(&self) -> &str {
        "Type text into the focused field of an instance"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id", "text"],
            "properties": {
                "instance_id": instance_id_schema(),
                "text": { "type": "string", "minLength": 1 },
                "submit": {
                    "type": "boolean",
                    "description": "Press enter after typing (default: false)"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let instance_id = params.instance_id()?;
        let text: String = params.require("text")?;
        if text.is_empty() {
            return Err(ParamError::out_of_range("text", "must not be empty").into());
        }
        let submit = params.optional::<bool>("submit")?.unwrap_or(false);

        let link = connect(ctx, &instance_id).await?;
        send_command(
            &link,
            &serde_json::json!({ "command": "input", "text": text, "submit": submit }),
        )
        .await?;

        Ok(ToolResult::from_json(serde_json::json!({
            "instance_id": instance_id.as_str(),
            "command": "input",
            "length": text.chars().count(),
            "submit": submit,
        })))
    }
}
