//! Instance-command tools invoked through `tools/call`.

pub mod registry;
pub mod tool;
pub mod tools;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext};
pub use tools::create_default_registry;
