//! Per-connection session state and the registry of open sessions.

use std::time::Instant;

use dashmap::DashMap;
use marionette_core::{Response, SessionId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::handlers::handle_message;
use crate::server::AppState;

/// State owned by one session's dispatch task.
pub struct Session {
    pub id: SessionId,
    initialized: bool,
    client_info: Option<Value>,
    shutdown_requested: bool,
    cancel: CancellationToken,
}

impl Session {
    /// A session not tracked by any registry. Cancelling `cancel` aborts
    /// in-flight tool calls.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            id: SessionId::new(),
            initialized: false,
            client_info: None,
            shutdown_requested: false,
            cancel,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self, client_info: Option<Value>) {
        self.initialized = true;
        self.client_info = client_info;
    }

    pub fn client_info(&self) -> Option<&Value> {
        self.client_info.as_ref()
    }

    pub(crate) fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Whether the last dispatched message asked the server to shut down.
    pub fn take_shutdown_request(&mut self) -> bool {
        std::mem::take(&mut self.shutdown_requested)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("initialized", &self.initialized)
            .finish()
    }
}

struct SessionEntry {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Registry of open sessions and their outbound queues.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    max_send_queue: usize,
}

impl SessionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Open a session whose lifetime is bounded by `parent`. The receiver
    /// yields everything queued for the session's transport.
    pub fn register(&self, parent: &CancellationToken) -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let session = Session::new(parent.child_token());
        let _ = self.sessions.insert(
            session.id.clone(),
            SessionEntry {
                tx,
                cancel: session.cancel_token(),
            },
        );
        (session, rx)
    }

    /// Remove a session and cancel its in-flight work.
    pub fn unregister(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Queue a message for a session, waiting for room when the queue is full.
    pub async fn send_to(&self, id: &SessionId, message: String) -> bool {
        let Some(tx) = self.sessions.get(id).map(|entry| entry.tx.clone()) else {
            return false;
        };
        if tx.send(message).await.is_err() {
            warn!(session_id = %id, "session writer closed, dropping message");
            return false;
        }
        true
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// One unit of client traffic handed to the dispatch loop.
#[derive(Debug)]
pub(crate) enum Inbound {
    Text(String),
    /// The transport dropped a message longer than `limit` bytes.
    Oversized { limit: usize },
}

/// Dispatch a session's inbound messages one at a time, queueing each reply
/// before the next message is read. Returns when the inbound stream ends,
/// the session is cancelled, or its writer goes away.
pub(crate) async fn run_session(
    state: &AppState,
    mut session: Session,
    mut inbound: mpsc::Receiver<Inbound>,
) {
    let cancel = session.cancel_token();
    let started = Instant::now();
    let mut handled: u64 = 0;

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        handled += 1;

        let reply = match message {
            Inbound::Text(text) => tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                reply = handle_message(&state.handler_state, &mut session, &text) => reply,
            },
            Inbound::Oversized { limit } => Some(Response::invalid_request(
                None,
                format!("message exceeds {limit} bytes"),
            )),
        };

        if let Some(response) = reply {
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if !state.sessions.send_to(&session.id, json).await {
                        break;
                    }
                }
                Err(e) => error!(session_id = %session.id, error = %e, "failed to encode response"),
            }
        }

        if session.take_shutdown_request() {
            info!(session_id = %session.id, "shutdown requested by client");
            state.handler_state.request_shutdown();
        }
    }

    let _ = state.sessions.unregister(&session.id);
    info!(
        session_id = %session.id,
        messages = handled,
        duration_ms = started.elapsed().as_millis() as u64,
        "session closed"
    );
}
