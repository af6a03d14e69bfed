use async_trait::async_trait;
use marionette_core::{ParamError, Parameters, ToolError, ToolResult};
use serde_json::Value;

use super::{connect, instance_id_schema, millis, next_line, send_command};
use crate::tool::{Tool, ToolContext};

const DEFAULT_TIMEOUT_MS: i64 = 2000;

/// Ask the instance to describe its current state and return the reply.
pub struct InspectTool;

#[async_trait]
impl Tool for InspectTool {
    fn name(&self) -> &str {
        "inspect"
    }

    fn description(&self) -> &str {
        "Request a state snapshot from an instance and return its reply"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id"],
            "properties": {
                "instance_id": instance_id_schema(),
                "target": {
                    "type": "string",
                    "description": "What to inspect; instance-defined"
                },
                "timeout_ms": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "How long to wait for the reply (default: 2000)"
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
        let target: Option<String> = params.optional("target")?;
        if target.as_deref() == Some("") {
            return Err(ParamError::out_of_range("target", "must not be empty").into());
        }
        let timeout = millis(params, "timeout_ms", Some(DEFAULT_TIMEOUT_MS), 1)?;

        let link = connect(ctx, &instance_id).await?;

        let mut command = serde_json::json!({ "command": "inspect" });
        if let Some(target) = &target {
            command["target"] = Value::String(target.clone());
        }

        // Subscribe first so a fast reply is not missed.
        let mut rx = link.subscribe();
        send_command(&link, &command).await?;
        let line = next_line(&link, &mut rx, timeout, &ctx.abort_signal, |_| true).await?;

        let reply = serde_json::from_str::<Value>(&line).unwrap_or(Value::String(line));
        Ok(ToolResult::from_json(serde_json::json!({
            "instance_id": instance_id.as_str(),
            "reply": reply,
        })))
    }
}
