//! Connections from the control plane to downstream application instances.

pub mod codec;
pub mod config;
pub mod link;
pub mod manager;

pub use codec::{Frame, LineCodec};
pub use config::{AddressResolver, LinkConfig};
pub use link::{InstanceLink, LinkOptions, LinkState, MessageCallback};
pub use manager::InstanceManager;
