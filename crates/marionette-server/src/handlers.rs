//! JSON-RPC method handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use marionette_core::rpc::decode_request;
use marionette_core::{ErrorCode, Parameters, Request, RequestId, Response};
use marionette_link::InstanceManager;
use marionette_tools::{ToolContext, ToolRegistry};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::Session;

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub tools: Arc<ToolRegistry>,
    pub instances: Arc<InstanceManager>,
    pub server_version: String,
    shutdown: CancellationToken,
}

impl HandlerState {
    pub fn new(tools: Arc<ToolRegistry>, instances: Arc<InstanceManager>) -> Self {
        Self {
            tools,
            instances,
            server_version: SERVER_VERSION.to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Signal that a client asked the server to shut down.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Fires once any client has requested shutdown.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// A handler failure that maps onto an RPC error object.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("session is not initialized; call initialize first")]
    NotInitialized,
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::NotInitialized => ErrorCode::NOT_INITIALIZED,
        }
    }

    fn into_response(self, id: RequestId) -> Response {
        Response::error(Some(id), self.code(), Some(self.to_string()), None)
    }
}

/// Handle one inbound message for `session`.
///
/// Returns the response owed to the client, or `None` for notifications.
/// A panic inside a handler is converted to `InternalError` when an id is known.
pub async fn handle_message(
    state: &HandlerState,
    session: &mut Session,
    text: &str,
) -> Option<Response> {
    let request = match decode_request(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(session_id = %session.id, error = %e, "rejecting malformed message");
            return Some(e.to_response());
        }
    };

    let id = request.id.clone();
    let method = request.method.clone();
    let session_id = session.id.clone();

    match AssertUnwindSafe(dispatch(state, session, request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let msg = panic_message(&panic);
            error!(session_id = %session_id, method = %method, panic = %msg, "handler panicked");
            id.map(|id| Response::internal_error(Some(id), "internal error while handling request"))
        }
    }
}

/// Route a decoded request to its handler.
async fn dispatch(state: &HandlerState, session: &mut Session, request: Request) -> Option<Response> {
    let Request {
        method, params, id, ..
    } = request;

    if matches!(id, Some(RequestId::Null)) {
        return Some(Response::invalid_request(id, "id must not be null"));
    }

    let result = match method.as_str() {
        "initialize" => {
            if id.is_none() {
                warn!(session_id = %session.id, "initialize sent as a notification, ignoring");
                return None;
            }
            initialize(state, session, params)
        }
        "tools/call" => tools_call(state, session, params).await,
        "tools/list" => Ok(tools_list(state)),
        "shutdown" => {
            session.request_shutdown();
            Ok(serde_json::json!({}))
        }
        _ => {
            let Some(id) = id else {
                debug!(session_id = %session.id, method = %method, "dropping unknown notification");
                return None;
            };
            debug!(session_id = %session.id, method = %method, "method not found");
            return Some(Response::method_not_found(Some(id)));
        }
    };

    // Notifications are never answered, whatever the outcome.
    let id = id?;
    Some(match result {
        Ok(value) => Response::success(Some(id), value),
        Err(e) => {
            debug!(session_id = %session.id, method = %method, error = %e, "request failed");
            e.into_response(id)
        }
    })
}

fn initialize(
    state: &HandlerState,
    session: &mut Session,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let Some(Value::Object(params)) = params else {
        return Err(DispatchError::InvalidRequest(
            "initialize params must be an object".into(),
        ));
    };

    let client_info = params
        .get("client_info")
        .or_else(|| params.get("clientInfo"))
        .cloned();
    let client_name = client_info
        .as_ref()
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let reinitialized = session.is_initialized();
    session.mark_initialized(client_info);
    info!(
        session_id = %session.id,
        client = %client_name,
        reinitialized,
        "session initialized"
    );

    Ok(serde_json::json!({
        "server_version": state.server_version,
        "supported_tools": state.tools.names(),
        "session_id": session.id,
    }))
}

async fn tools_call(
    state: &HandlerState,
    session: &Session,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    if !session.is_initialized() {
        return Err(DispatchError::NotInitialized);
    }

    let Some(Value::Object(mut params)) = params else {
        return Err(DispatchError::InvalidParams(
            "tools/call params must be an object".into(),
        ));
    };

    let tool_name = match params.get("tool_name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => {
            return Err(DispatchError::InvalidParams(
                "tool_name must be a non-empty string".into(),
            ))
        }
    };

    let arguments = match params.remove("parameters") {
        None | Some(Value::Null) => Parameters::default(),
        Some(Value::Object(map)) => Parameters::new(map),
        Some(_) => {
            return Err(DispatchError::InvalidParams(
                "parameters must be an object".into(),
            ))
        }
    };

    let ctx = ToolContext::new(session.id.clone(), Arc::clone(&state.instances))
        .with_abort_signal(session.cancel_token());

    debug!(session_id = %session.id, tool = %tool_name, "calling tool");
    let Some(result) = state.tools.call(&tool_name, &arguments, &ctx).await else {
        return Err(DispatchError::InvalidParams(format!("unknown tool: {tool_name}")));
    };
    Ok(result.to_wire())
}

fn tools_list(state: &HandlerState) -> Value {
    serde_json::json!({ "tools": state.tools.definitions() })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
