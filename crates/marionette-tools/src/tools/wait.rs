use async_trait::async_trait;
use marionette_core::{Parameters, ToolError, ToolResult};

use super::{connect, instance_id_schema, millis, next_line};
use crate::tool::{Tool, ToolContext};

/// Pause, or block until the instance reports a line containing `pattern`.
pub struct WaitTool;

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Wait for a duration, or until the instance emits a line containing a pattern"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id", "duration_ms"],
            "properties": {
                "instance_id": instance_id_schema(),
                "duration_ms": { "type": "integer", "minimum": 0 },
                "pattern": {
                    "type": "string",
                    "description": "Substring to wait for; duration_ms becomes the timeout"
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
        let duration = millis(params, "duration_ms", None, 0)?;
        let pattern: Option<String> = params.optional("pattern")?;

        let link = connect(ctx, &instance_id).await?;

        let Some(pattern) = pattern else {
            tokio::select! {
                () = tokio::time::sleep(duration) => {}
                () = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
            }
            return Ok(ToolResult::from_json(serde_json::json!({
                "instance_id": instance_id.as_str(),
                "waited_ms": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            })));
        };

        let mut rx = link.subscribe();
        let line = next_line(&link, &mut rx, duration, &ctx.abort_signal, |line| {
            line.contains(pattern.as_str())
        })
        .await?;

        Ok(ToolResult::from_json(serde_json::json!({
            "instance_id": instance_id.as_str(),
            "matched": true,
            "line": line,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{params, FakeInstance};
    use std::time::Duration;

    #[tokio::test]
    async fn plain_wait_sleeps() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();

        let result = WaitTool
            .execute(&params(serde_json::json!({"instance_id": 0, "duration_ms": 20})), &ctx)
            .await
            .unwrap();
        assert_eq!(result.payload().unwrap()["waited_ms"], 20);
    }

    #[tokio::test]
    async fn pattern_matches_later_line() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();
        let _link = ctx
            .instances
            .get_or_connect(&marionette_core::InstanceId::from(0), ctx.connect_timeout)
            .await
            .unwrap();

        let task_ctx = ctx.clone();
        let waiting = tokio::spawn(async move {
            WaitTool
                .execute(
                    &params(serde_json::json!({
                        "instance_id": 0,
                        "duration_ms": 2000,
                        "pattern": "ready"
                    })),
                    &task_ctx,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        instance.push("booting");
        instance.push("status: ready");

        let result = waiting.await.unwrap().unwrap();
        let payload = result.payload().unwrap();
        assert_eq!(payload["matched"], true);
        assert_eq!(payload["line"], "status: ready");
    }

    #[tokio::test]
    async fn pattern_times_out() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();

        let err = WaitTool
            .execute(
                &params(serde_json::json!({"instance_id": 0, "duration_ms": 50, "pattern": "never"})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timed out after 50ms");
    }

    #[tokio::test]
    async fn cancelled_by_session() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();
        ctx.abort_signal.cancel();

        let err = WaitTool
            .execute(&params(serde_json::json!({"instance_id": 0, "duration_ms": 5000})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
