use async_trait::async_trait;
use marionette_core::{ParamError, Parameters, ToolError, ToolResult};

use super::{connect, instance_id_schema};
use crate::tool::{Tool, ToolContext};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Recent lines received from an instance. Sends nothing.
pub struct LogTool;

#[async_trait]
impl Tool for LogTool {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Return the most recent lines received from an instance"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["instance_id"],
            "properties": {
                "instance_id": instance_id_schema(),
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_LIMIT,
                    "description": "Number of lines (default: 50)"
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
        let limit = params.optional::<i64>("limit")?.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(
                ParamError::out_of_range("limit", format!("must be between 1 and {MAX_LIMIT}"))
                    .into(),
            );
        }

        let link = connect(ctx, &instance_id).await?;
        let lines = link.recent(usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(ToolResult::from_json(serde_json::json!({
            "instance_id": instance_id.as_str(),
            "lines": lines,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{closed_port, context_for_port, params, FakeInstance};
    use marionette_core::InstanceId;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_recent_history() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();
        let link = ctx
            .instances
            .get_or_connect(&InstanceId::from(0), ctx.connect_timeout)
            .await
            .unwrap();

        for i in 0..5 {
            instance.push(&format!("line {i}"));
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while link.recent(10).len() < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let result = LogTool
            .execute(&params(serde_json::json!({"instance_id": 0, "limit": 2})), &ctx)
            .await
            .unwrap();
        assert_eq!(
            result.payload().unwrap()["lines"],
            serde_json::json!(["line 3", "line 4"])
        );
    }

    #[tokio::test]
    async fn empty_history_without_traffic() {
        let instance = FakeInstance::start().await;
        let ctx = instance.context();
        let result = LogTool
            .execute(&params(serde_json::json!({"instance_id": 0})), &ctx)
            .await
            .unwrap();
        assert_eq!(result.payload().unwrap()["lines"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn limit_out_of_range() {
        let ctx = context_for_port(closed_port().await);
        for limit in [0, 501] {
            let err = LogTool
                .execute(&params(serde_json::json!({"instance_id": 0, "limit": limit})), &ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidParams(ParamError::OutOfRange { .. })));
        }
    }
}
