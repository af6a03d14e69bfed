use std::collections::HashMap;
use std::sync::Arc;

use marionette_core::{Parameters, ToolDefinition, ToolResult};
use tracing::debug;

use crate::tool::{Tool, ToolContext};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let _ = self.tools.insert(name, tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Total tool count.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Run the named tool. `None` if no such tool is registered.
    pub async fn call(
        &self,
        name: &str,
        params: &Parameters,
        ctx: &ToolContext,
    ) -> Option<ToolResult> {
        let tool = self.get(name)?;
        let result = match tool.execute(params, ctx).await {
            Ok(result) => result,
            Err(e) => {
                debug!(tool = name, session_id = %ctx.session_id, error = %e, "tool failed");
                ToolResult::from(e)
            }
        };
        Some(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use marionette_core::{ParamError, SessionId, ToolError};
    use marionette_link::{InstanceManager, LinkConfig};

    struct DummyTool {
        name: String,
    }

    impl DummyTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            params: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let echo: String = params.require("echo")?;
            if echo == "fail" {
                return Err(ParamError::out_of_range("echo", "must not be fail").into());
            }
            Ok(ToolResult::from_json(serde_json::json!({"echo": echo})))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            SessionId::new(),
            Arc::new(InstanceManager::new(&LinkConfig::default())),
        )
    }

    fn params(value: serde_json::Value) -> Parameters {
        Parameters::from_value(value).unwrap()
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("click")));

        assert!(registry.contains("click"));
        assert!(!registry.contains("swipe"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("click").is_some());
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("click")));
        assert!(registry.unregister("click"));
        assert!(!registry.contains("click"));
        assert!(!registry.unregister("click")); // second time returns false
    }

    #[test]
    fn names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("wait")));
        registry.register(Arc::new(DummyTool::new("click")));
        registry.register(Arc::new(DummyTool::new("log")));

        assert_eq!(registry.names(), vec!["click", "log", "wait"]);
    }

    #[test]
    fn definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("swipe")));
        registry.register(Arc::new(DummyTool::new("input")));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "input");
        assert_eq!(defs[1].name, "swipe");
    }

    #[tokio::test]
    async fn call_unknown_tool_returns_none() {
        let registry = ToolRegistry::new();
        assert!(registry
            .call("missing", &Parameters::default(), &ctx())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn call_flattens_errors_into_tool_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("echo")));
        let ctx = ctx();

        let ok = registry
            .call("echo", &params(serde_json::json!({"echo": "hi"})), &ctx)
            .await
            .unwrap();
        assert_eq!(ok.payload().unwrap()["echo"], "hi");

        let missing = registry.call("echo", &Parameters::default(), &ctx).await.unwrap();
        assert_eq!(
            missing.error_message(),
            Some("missing required parameter: echo")
        );

        let rejected = registry
            .call("echo", &params(serde_json::json!({"echo": "fail"})), &ctx)
            .await
            .unwrap();
        assert!(rejected.is_error());
        assert!(rejected.payload().is_none());
    }
}
