pub mod click;
pub mod input;
pub mod inspect;
pub mod log;
pub mod swipe;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use marionette_core::{InstanceId, ParamError, Parameters, ToolError};
use marionette_link::InstanceLink;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::ToolRegistry;
use crate::tool::ToolContext;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Gestures
    registry.register(Arc::new(click::ClickTool));
    registry.register(Arc::new(swipe::SwipeTool));
    registry.register(Arc::new(input::InputTool));

    // Observation
    registry.register(Arc::new(wait::WaitTool));
    registry.register(Arc::new(inspect::InspectTool));
    registry.register(Arc::new(log::LogTool));

    registry
}

/// Schema fragment shared by every tool.
pub(crate) fn instance_id_schema() -> Value {
    serde_json::json!({
        "type": ["integer", "string"],
        "description": "Index of the target instance"
    })
}

/// Connected link for `instance_id`, connecting on first use.
pub(crate) async fn connect(
    ctx: &ToolContext,
    instance_id: &InstanceId,
) -> Result<Arc<InstanceLink>, ToolError> {
    ctx.instances
        .get_or_connect(instance_id, ctx.connect_timeout)
        .await
        .ok_or_else(|| ToolError::Unreachable(instance_id.clone()))
}

/// Write one command line to the instance.
pub(crate) async fn send_command(link: &InstanceLink, command: &Value) -> Result<(), ToolError> {
    let line = command.to_string();
    debug!(instance_id = %link.instance_id(), command = %line, "sending instance command");
    if link.send(&line).await {
        Ok(())
    } else {
        Err(ToolError::SendFailed(link.instance_id().clone()))
    }
}

/// Millisecond parameter with an optional default and an inclusive minimum.
pub(crate) fn millis(
    params: &Parameters,
    key: &str,
    default: Option<i64>,
    min: i64,
) -> Result<Duration, ParamError> {
    let value = match (params.optional::<i64>(key)?, default) {
        (Some(v), _) => v,
        (None, Some(d)) => d,
        (None, None) => return Err(ParamError::Missing(key.to_string())),
    };
    if value < min {
        return Err(ParamError::out_of_range(key, format!("must be at least {min}")));
    }
    Ok(Duration::from_millis(value.unsigned_abs()))
}

/// Wait for the next received line accepted by `accept`.
///
/// Fails on timeout, on disconnect of `link`, or when `cancel` fires.
pub(crate) async fn next_line(
    link: &InstanceLink,
    rx: &mut broadcast::Receiver<String>,
    timeout: Duration,
    cancel: &CancellationToken,
    mut accept: impl FnMut(&str) -> bool,
) -> Result<String, ToolError> {
    let closed = link.closed_signal();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ToolError::Cancelled),
            received = rx.recv() => match received {
                Ok(line) if accept(&line) => return Ok(line),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(instance_id = %link.instance_id(), skipped, "inbox subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ToolError::Disconnected(link.instance_id().clone()));
                }
            },
            () = closed.cancelled() => {
                return Err(ToolError::Disconnected(link.instance_id().clone()));
            }
            () = &mut deadline => return Err(ToolError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use marionette_core::{Parameters, SessionId};
    use marionette_link::{InstanceManager, LinkConfig};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::tool::ToolContext;

    type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

    /// Loopback stand-in for an instance. Records every received line and
    /// writes whatever the responder or [`FakeInstance::push`] produces.
    pub struct FakeInstance {
        pub port: u16,
        pub received: mpsc::UnboundedReceiver<String>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    impl FakeInstance {
        pub async fn start() -> Self {
            Self::with_responder(|_| None).await
        }

        pub async fn with_responder(
            responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
        ) -> Self {
            let responder: Responder = Box::new(responder);
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let (received_tx, received) = mpsc::unbounded_channel();
            let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

            let _ = tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();
                    loop {
                        tokio::select! {
                            line = lines.next_line() => {
                                let Ok(Some(line)) = line else { break };
                                let reply = responder(&line);
                                let _ = received_tx.send(line);
                                if let Some(reply) = reply {
                                    let _ = writer.write_all(format!("{reply}\n").as_bytes()).await;
                                }
                            }
                            Some(line) = outgoing_rx.recv() => {
                                let _ = writer.write_all(format!("{line}\n").as_bytes()).await;
                            }
                        }
                    }
                }
            });

            Self {
                port,
                received,
                outgoing,
            }
        }

        /// Emit an unsolicited line to the connected client.
        pub fn push(&self, line: &str) {
            let _ = self.outgoing.send(line.to_string());
        }

        pub async fn next_received(&mut self) -> serde_json::Value {
            let line = tokio::time::timeout(Duration::from_secs(2), self.received.recv())
                .await
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        pub fn context(&self) -> ToolContext {
            context_for_port(self.port)
        }
    }

    pub fn context_for_port(port: u16) -> ToolContext {
        let manager = InstanceManager::new(&LinkConfig {
            host: "127.0.0.1".into(),
            base_port: port,
            max_instances: 1,
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        ToolContext::new(SessionId::new(), Arc::new(manager))
    }

    /// Port nothing listens on.
    pub async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    pub fn params(value: serde_json::Value) -> Parameters {
        Parameters::from_value(value).unwrap()
    }
}
