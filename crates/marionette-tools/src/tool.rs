use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marionette_core::{Parameters, SessionId, ToolDefinition, ToolError, ToolResult};
use marionette_link::InstanceManager;
use tokio_util::sync::CancellationToken;

/// Context available to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub instances: Arc<InstanceManager>,
    pub connect_timeout: Duration,
    /// Cancelled when the calling session closes.
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId, instances: Arc<InstanceManager>) -> Self {
        let connect_timeout = instances.connect_timeout();
        Self {
            session_id,
            instances,
            connect_timeout,
            abort_signal: CancellationToken::new(),
        }
    }

    pub fn with_abort_signal(mut self, abort_signal: CancellationToken) -> Self {
        self.abort_signal = abort_signal;
        self
    }
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Validate `params` and carry out the command. Every `Err` becomes a
    /// [`ToolResult::Error`]; none of them is a protocol error.
    async fn execute(
        &self,
        params: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}
