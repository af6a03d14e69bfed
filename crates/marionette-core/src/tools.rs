use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::InstanceId;
use crate::params::ParamError;

/// Outcome of a tool dispatch. Success and error are mutually exclusive.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    Success(Map<String, Value>),
    Error(String),
}

impl ToolResult {
    pub fn success(payload: Map<String, Value>) -> Self {
        Self::Success(payload)
    }

    /// Build a success from a JSON object; any other value is wrapped under `value`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Success(map),
            other => {
                let mut map = Map::new();
                let _ = map.insert("value".into(), other);
                Self::Success(map)
            }
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Present only for [`ToolResult::Error`].
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            Self::Success(_) => None,
        }
    }

    /// Present only for [`ToolResult::Success`].
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success(map) => Some(map),
            Self::Error(_) => None,
        }
    }

    /// Shape embedded in a successful `tools/call` response.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Success(map) => serde_json::json!({
                "success": true,
                "result": Value::Object(map.clone()),
            }),
            Self::Error(msg) => serde_json::json!({
                "success": false,
                "error": msg,
            }),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        Self::Error(err.to_string())
    }
}

/// Tool description advertised to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    InvalidParams(#[from] ParamError),
    #[error("instance {0} is not reachable")]
    Unreachable(InstanceId),
    #[error("failed to send command to instance {0}")]
    SendFailed(InstanceId),
    #[error("instance {0} disconnected")]
    Disconnected(InstanceId),
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_wire_shape() {
        let result = ToolResult::from_json(json!({"x": 1}));
        assert!(!result.is_error());
        assert_eq!(result.error_message(), None);
        assert_eq!(
            result.to_wire(),
            json!({"success": true, "result": {"x": 1}})
        );
    }

    #[test]
    fn error_wire_shape() {
        let result = ToolResult::error("boom");
        assert!(result.is_error());
        assert_eq!(result.error_message(), Some("boom"));
        assert!(result.payload().is_none());
        assert_eq!(result.to_wire(), json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn non_object_json_is_wrapped() {
        let result = ToolResult::from_json(json!("pong"));
        assert_eq!(result.payload().unwrap()["value"], "pong");
    }

    #[test]
    fn tool_error_converts_to_result() {
        let result: ToolResult = ToolError::Unreachable(InstanceId::from_raw("3")).into();
        assert_eq!(result.error_message(), Some("instance 3 is not reachable"));

        let result: ToolResult = ToolError::Timeout(Duration::from_millis(250)).into();
        assert_eq!(result.error_message(), Some("timed out after 250ms"));

        let result: ToolResult = ToolError::from(ParamError::Missing("x".into())).into();
        assert_eq!(result.error_message(), Some("missing required parameter: x"));
    }
}
