use async_trait::async_trait;
use marionette_core::{Parameters, ToolError, ToolResult};

use super::{connect, instance_id_schema, millis, send_command};
use crate::tool::{Tool, ToolContext};

const DEFAULT_DURATION_MS: i64 = 300;

pub struct SwipeTool;

#[async_trait]
impl Tool for SwipeTool {
    fn name(&self) -> &str {
        "swipe"
    }

    fn description(&self) -> &str {
        "Swipe between two screen coordinates on an instance"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id", "from_x", "from_y", "to_x", "to_y"],
            "properties": {
                "instance_id": instance_id_schema(),
                "from_x": { "type": "number" },
                "from_y": { "type": "number" },
                "to_x": { "type": "number" },
                "to_y": { "type": "number" },
                "duration_ms": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Gesture duration (default: 300)"
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
        let from_x: f64 = params.require("from_x")?;
        let from_y: f64 = params.require("from_y")?;
        let to_x: f64 = params.require("to_x")?;
        let to_y: f64 = params.require("to_y")?;
        let duration = millis(params, "duration_ms", Some(DEFAULT_DURATION_MS), 1)?;
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let link = connect(ctx, &instance_id).await?;
        let command = serde_json::json!({
            "command": "swipe",
            "from_x": from_x,
            "from_y": from_y,
            "to_x": to_x,
            "to_y": to_y,
            "duration_ms": duration_ms,
        });
        send_command(&link, &command).await?;

        let mut result = command;
        result["instance_id"] = instance_id.as_str().into();
        Ok(ToolResult::from_json(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{closed_port, context_for_port, params, FakeInstance};
    use marionette_core::ParamError;

    #[tokio::test]
    async fn sends_swipe_with_default_duration() {
        let mut instance = FakeInstance::start().await;
        let ctx = instance.context();

        let result = SwipeTool
            .execute(
                &params(serde_json::json!({
                    "instance_id": 0,
                    "from_x": 0, "from_y": 100, "to_x": 0, "to_y": 400
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result.payload().unwrap()["duration_ms"], 300);

        let sent = instance.next_received().await;
        assert_eq!(sent["command"], "swipe");
        assert_eq!(sent["to_y"], 400.0);
        assert_eq!(sent["duration_ms"], 300);
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let ctx = context_for_port(closed_port().await);
        let err = SwipeTool
            .execute(
                &params(serde_json::json!({
                    "instance_id": 0,
                    "from_x": 0, "from_y": 0, "to_x": 1, "to_y": 1,
                    "duration_ms": 0
                })),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvalidParams(ParamError::OutOfRange { ref key, .. }) if key == "duration_ms"
        ));
    }
}
