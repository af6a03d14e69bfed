//! JSON-RPC envelope types shared by the server and its clients.
//!
//! Wire shape: request `{version, method, params?, id?}`, response
//! `{version, id, result | error}`. Optional fields are omitted rather than
//! emitted as `null`; `id` is always present on responses and is `null`
//! when the request id could not be determined.

use std::ops::RangeInclusive;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Fixed version literal carried on every message.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Request identity. Echoed verbatim on the response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    #[default]
    Null,
}

impl RequestId {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Standard error codes plus the implementation-defined server range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Any code in [`ErrorCode::SERVER_ERROR_RANGE`].
    ServerError(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code {0}")]
pub struct UnknownErrorCode(pub i32);

impl ErrorCode {
    pub const SERVER_ERROR_RANGE: RangeInclusive<i32> = -32099..=-32000;

    /// Session has not completed `initialize`.
    pub const NOT_INITIALIZED: Self = Self::ServerError(-32002);

    /// Build a server-range code, rejecting values outside the reserved block.
    pub fn server(code: i32) -> Option<Self> {
        Self::SERVER_ERROR_RANGE
            .contains(&code)
            .then_some(Self::ServerError(code))
    }

    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Default message used when a caller does not supply one.
    pub fn canonical_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) if self == Self::NOT_INITIALIZED => "Server not initialized",
            Self::ServerError(_) => "Server error",
        }
    }

    /// Short classification string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::InternalError => "internal_error",
            Self::ServerError(_) => "server_error",
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -32700 => Ok(Self::ParseError),
            -32600 => Ok(Self::InvalidRequest),
            -32601 => Ok(Self::MethodNotFound),
            -32602 => Ok(Self::InvalidParams),
            -32603 => Ok(Self::InternalError),
            other => Self::server(other).ok_or(UnknownErrorCode(other)),
        }
    }
}

/// Error object carried in a response. Callers branch on `code` only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.unwrap_or_else(|| code.canonical_message().to_string()),
            data,
        }
    }
}

/// JSON-RPC request. A request without `id` is a notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, alias = "jsonrpc", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<RequestId>,
}

/// Distinguishes `"id": null` (Some(Null)) from a missing key (None).
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    RequestId::deserialize(deserializer).map(Some)
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<RequestId>) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            method: method.into(),
            params,
            id,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Why an inbound message could not become a [`Request`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON at all; the id is unknowable.
    #[error("parse error: {0}")]
    Parse(String),
    /// Valid JSON but not a valid request. Carries the id if one was readable.
    #[error("invalid request: {reason}")]
    Invalid {
        id: Option<RequestId>,
        reason: String,
    },
}

impl DecodeError {
    /// Response owed for this failure.
    pub fn to_response(&self) -> Response {
        match self {
            Self::Parse(_) => Response::parse_error(),
            Self::Invalid { id, reason } => Response::error(
                id.clone(),
                ErrorCode::InvalidRequest,
                None,
                Some(serde_json::json!({ "reason": reason })),
            ),
        }
    }
}

/// Decode one inbound message. Unknown extra fields are ignored.
pub fn decode_request(text: &str) -> Result<Request, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(invalid(None, "request must be a JSON object"));
    };

    let id = match map.get("id") {
        None => None,
        Some(raw) => match RequestId::deserialize(raw) {
            Ok(id) => Some(id),
            Err(_) => return Err(invalid(None, "id must be a string, an integer, or null")),
        },
    };

    let version = version_field(&map);
    if let Some(v) = version {
        if v.as_str() != Some(PROTOCOL_VERSION) {
            return Err(invalid(id, "unsupported protocol version"));
        }
    }

    let method = match map.get("method") {
        Some(Value::String(m)) if !m.is_empty() => m.clone(),
        Some(_) => return Err(invalid(id, "method must be a non-empty string")),
        None => return Err(invalid(id, "missing method")),
    };

    let params = match map.get("params") {
        None | Some(Value::Null) => None,
        Some(p) => Some(p.clone()),
    };

    Ok(Request {
        version: version.and_then(|v| v.as_str().map(str::to_string)),
        method,
        params,
        id,
    })
}

fn version_field(map: &Map<String, Value>) -> Option<&Value> {
    map.get("version").or_else(|| map.get("jsonrpc"))
}

fn invalid(id: Option<RequestId>, reason: &str) -> DecodeError {
    DecodeError::Invalid {
        id,
        reason: reason.to_string(),
    }
}

/// Exactly one of `result` / `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(alias = "jsonrpc")]
    pub version: String,
    #[serde(default)]
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: id.unwrap_or_default(),
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(
        id: Option<RequestId>,
        code: ErrorCode,
        message: Option<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: id.unwrap_or_default(),
            outcome: Outcome::Error(RpcError::new(code, message, data)),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, ErrorCode::ParseError, None, None)
    }

    pub fn method_not_found(id: Option<RequestId>) -> Self {
        Self::error(id, ErrorCode::MethodNotFound, None, None)
    }

    pub fn invalid_request(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::InvalidRequest, Some(msg.into()), None)
    }

    pub fn invalid_params(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::InvalidParams, Some(msg.into()), None)
    }

    pub fn internal_error(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::InternalError, Some(msg.into()), None)
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_round_trip() {
        let resp = Response::success(Some(RequestId::Number(42)), json!({"k": "v"}));
        let text = serde_json::to_string(&resp).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], 42);
        assert!(value.get("error").is_none());
        assert_eq!(value["result"], json!({"k": "v"}));

        let decoded: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn method_not_found_wire_shape() {
        let resp = Response::method_not_found(Some("b".into()));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "2.0",
                "id": "b",
                "error": {"code": -32601, "message": "Method not found"}
            })
        );
    }

    #[test]
    fn parse_error_has_null_id() {
        let value = serde_json::to_value(Response::parse_error()).unwrap();
        assert!(value["id"].is_null());
        assert_eq!(value["error"]["code"], -32700);
        assert_eq!(value["error"]["message"], "Parse error");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn error_keeps_explicit_message_and_data() {
        let resp = Response::error(
            Some(RequestId::Number(7)),
            ErrorCode::InvalidParams,
            Some("x must be a number".into()),
            Some(json!({"key": "x"})),
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["message"], "x must be a number");
        assert_eq!(value["error"]["data"]["key"], "x");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn error_code_registry() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::NOT_INITIALIZED,
        ] {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
        assert_eq!(ErrorCode::NOT_INITIALIZED.code(), -32002);
        assert_eq!(ErrorCode::server(-32050), Some(ErrorCode::ServerError(-32050)));
        assert_eq!(ErrorCode::server(-31999), None);
        assert_eq!(ErrorCode::try_from(-1), Err(UnknownErrorCode(-1)));
    }

    #[test]
    fn decode_full_request() {
        let req =
            decode_request(r#"{"version":"2.0","method":"initialize","params":{},"id":"a"}"#)
                .unwrap();
        assert_eq!(req.method, "initialize");
        assert_eq!(req.params, Some(json!({})));
        assert_eq!(req.id, Some(RequestId::String("a".into())));
        assert!(!req.is_notification());
    }

    #[test]
    fn decode_notification_and_null_id_differ() {
        let note = decode_request(r#"{"version":"2.0","method":"ping"}"#).unwrap();
        assert!(note.is_notification());

        let null_id = decode_request(r#"{"version":"2.0","method":"ping","id":null}"#).unwrap();
        assert_eq!(null_id.id, Some(RequestId::Null));
    }

    #[test]
    fn decode_tolerates_unknown_fields_and_jsonrpc_alias() {
        let req = decode_request(r#"{"jsonrpc":"2.0","method":"shutdown","id":3,"trace":"x"}"#)
            .unwrap();
        assert_eq!(req.method, "shutdown");
        assert_eq!(req.id, Some(RequestId::Number(3)));
        assert_eq!(req.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn decode_parse_failure() {
        assert!(matches!(decode_request("{not json"), Err(DecodeError::Parse(_))));
        let resp = decode_request("{not json").unwrap_err().to_response();
        assert!(resp.id.is_null());
        assert_eq!(resp.error_object().unwrap().code, ErrorCode::ParseError);
    }

    #[test]
    fn decode_missing_method_keeps_id() {
        let err = decode_request(r#"{"version":"2.0","id":9}"#).unwrap_err();
        match &err {
            DecodeError::Invalid { id, .. } => assert_eq!(id, &Some(RequestId::Number(9))),
            other => panic!("unexpected {other:?}"),
        }
        let resp = err.to_response();
        assert_eq!(resp.id, RequestId::Number(9));
        assert_eq!(resp.error_object().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        for text in [
            "[]",
            "42",
            r#"{"method":"x","id":{"a":1}}"#,
            r#"{"method":"x","id":1.5}"#,
        ] {
            match decode_request(text) {
                Err(DecodeError::Invalid { id, .. }) => assert_eq!(id, None, "{text}"),
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
        assert!(matches!(
            decode_request(r#"{"version":"1.0","method":"x","id":1}"#),
            Err(DecodeError::Invalid { id: Some(RequestId::Number(1)), .. })
        ));
        assert!(matches!(
            decode_request(r#"{"method":7,"id":"q"}"#),
            Err(DecodeError::Invalid { .. })
        ));
    }

    #[test]
    fn request_serialization_omits_absent_fields() {
        let req = Request::new("shutdown", None, None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"version": "2.0", "method": "shutdown"}));
    }

    #[test]
    fn request_serde_preserves_null_id() {
        let req: Request = serde_json::from_str(r#"{"method":"x","id":null}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Null));
        let req: Request = serde_json::from_str(r#"{"method":"x"}"#).unwrap();
        assert_eq!(req.id, None);
    }
}
