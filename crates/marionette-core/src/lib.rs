pub mod ids;
pub mod params;
pub mod rpc;
pub mod tools;

pub use ids::{InstanceId, SessionId};
pub use params::{FromParam, ParamError, ParamKind, Parameters};
pub use rpc::{DecodeError, ErrorCode, Outcome, Request, RequestId, Response, RpcError};
pub use tools::{ToolDefinition, ToolError, ToolResult};
