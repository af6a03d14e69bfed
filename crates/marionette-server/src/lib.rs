pub mod handlers;
pub mod server;
pub mod session;
pub mod tcp;
pub mod ws;

pub use handlers::{handle_message, DispatchError, HandlerState};
pub use server::{start, ServerConfig, ServerHandle, Transport};
pub use session::{Session, SessionRegistry};
