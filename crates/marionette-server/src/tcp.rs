//! Raw TCP transport: one session per connection, one message per line.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use marionette_link::{Frame, LineCodec};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::server::AppState;
use crate::session::{run_session, Inbound};

const MAX_LINE_LENGTH: usize = 1024 * 1024;
const INBOUND_QUEUE: usize = 64;

/// Accept connections until the server is cancelled.
pub(crate) async fn serve(listener: TcpListener, state: AppState) {
    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn_state = state.clone();
                    let _ = state.tracker.spawn(handle_tcp_connection(stream, peer, conn_state));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
    debug!("tcp accept loop stopped");
}

async fn handle_tcp_connection(stream: TcpStream, peer: SocketAddr, state: AppState) {
    let _ = stream.set_nodelay(true);
    let (session, mut outbound) = state.sessions.register(&state.cancel);
    let session_id = session.id.clone();
    info!(session_id = %session_id, peer = %peer, transport = "tcp", "session opened");

    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LineCodec::new(MAX_LINE_LENGTH));
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if let Err(e) = sink.send(line).await {
                debug!(session_id = %writer_id, error = %e, "socket write failed");
                return;
            }
        }
        let _ = SinkExt::<String>::close(&mut sink).await;
    });

    // EOF only ends the inbound stream, so a half-closed client still
    // receives replies to what it already sent.
    let reader_id = session_id.clone();
    let cancel = session.cancel_token();
    let reader = tokio::spawn(async move {
        while let Some(item) = lines.next().await {
            let message = match item {
                Ok(Frame::Line(line)) if line.trim().is_empty() => continue,
                Ok(Frame::Line(line)) => Inbound::Text(line),
                Ok(Frame::Oversized) => {
                    warn!(session_id = %reader_id, max = MAX_LINE_LENGTH, "discarding oversized line");
                    Inbound::Oversized { limit: MAX_LINE_LENGTH }
                }
                Err(e) => {
                    debug!(session_id = %reader_id, error = %e, "socket read failed");
                    cancel.cancel();
                    return;
                }
            };
            if inbound_tx.send(message).await.is_err() {
                return;
            }
        }
    });

    run_session(&state, session, inbound_rx).await;

    reader.abort();
    let _ = writer.await;
}
