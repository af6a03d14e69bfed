//! WebSocket transport: one session per upgraded connection, one message per text frame.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use marionette_core::SessionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::server::AppState;
use crate::session::{run_session, Inbound};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INBOUND_QUEUE: usize = 64;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a WebSocket connection: split into reader/writer and run the
/// session's dispatch loop until either side ends.
pub async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (session, outbound) = state.sessions.register(&state.cancel);
    let session_id = session.id.clone();
    info!(session_id = %session_id, transport = "websocket", "session opened");

    let (ws_tx, ws_rx) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    let mut writer = tokio::spawn(write_loop(ws_tx, outbound, session_id.clone()));
    let reader = tokio::spawn(read_loop(
        ws_rx,
        inbound_tx,
        session.cancel_token(),
        session_id.clone(),
    ));

    run_session(&state, session, inbound_rx).await;

    reader.abort();
    // The session is unregistered, so the writer ends once its queue drains.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "writer did not drain in time");
        writer.abort();
    }
}

/// Forward queued messages to the socket, pinging on a fixed interval.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<String>,
    session_id: SessionId,
) {
    let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            debug!(session_id = %session_id, "socket write failed");
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    return;
                }
                trace!(session_id = %session_id, "sent ping");
            }
        }
    }

    let _ = ws_tx.send(WsMessage::Close(None)).await;
}

/// Forward text frames to the dispatch loop. The socket closing cancels
/// the session, aborting any in-flight tool call.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    session_id: SessionId,
) {
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(session_id = %session_id, "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue, // axum answers pings
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "socket read failed");
                break;
            }
        };
        if inbound.send(Inbound::Text(text)).await.is_err() {
            return;
        }
    }
    cancel.cancel();
}
