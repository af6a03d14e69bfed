use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use marionette_link::InstanceManager;
use marionette_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers::HandlerState;
use crate::session::SessionRegistry;
use crate::{tcp, ws};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How clients reach the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    #[serde(alias = "ws")]
    Websocket,
    Tcp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::Websocket),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Websocket => "websocket",
            Self::Tcp => "tcp",
        })
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Websocket,
            host: "127.0.0.1".into(),
            port: 9091,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers and session tasks.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub sessions: Arc<SessionRegistry>,
    /// Cancelled by [`ServerHandle::stop`]; parent of every session token.
    pub cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured transport and start serving. Returns a handle to stop it.
pub async fn start(
    config: ServerConfig,
    tools: Arc<ToolRegistry>,
    instances: Arc<InstanceManager>,
) -> Result<ServerHandle, std::io::Error> {
    let handler_state = Arc::new(HandlerState::new(tools, Arc::clone(&instances)));
    let shutdown = handler_state.shutdown_signal();
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let state = AppState {
        handler_state,
        sessions: Arc::new(SessionRegistry::new(config.max_send_queue)),
        cancel: cancel.clone(),
        tracker: tracker.clone(),
    };
    let sessions = Arc::clone(&state.sessions);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let server = match config.transport {
        Transport::Websocket => {
            let router = build_router(state);
            let stop = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
                {
                    error!(error = %e, "http server failed");
                }
            })
        }
        Transport::Tcp => tokio::spawn(tcp::serve(listener, state)),
    };

    info!(addr = %local_addr, transport = %config.transport, "marionette server started");

    Ok(ServerHandle {
        addr: local_addr,
        cancel,
        shutdown,
        sessions,
        instances,
        tracker,
        server,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    addr: SocketAddr,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    sessions: Arc<SessionRegistry>,
    instances: Arc<InstanceManager>,
    tracker: TaskTracker,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    /// Resolves once a client has called `shutdown`.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await;
    }

    /// Stop accepting, close every session, then dispose all instance links.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.tracker.close();
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task ended abnormally");
        }
        if tokio::time::timeout(STOP_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(remaining = self.tracker.len(), "sessions did not close in time");
        }
        self.instances.stop();
        info!("marionette server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| tracker.track_future(ws::handle_ws_connection(socket, state)))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": state.handler_state.server_version,
        "sessions": state.sessions.count(),
        "instances": state.handler_state.instances.count(),
    }))
}
