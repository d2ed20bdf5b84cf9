//! WebSocket transport server using Axum.
//!
//! Handles the HTTP upgrade, `graphql-ws` sub-protocol negotiation, the
//! connection limit and the health endpoint, then hands each socket to a
//! [`Connection`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use futures_util::StreamExt;
use gqlws_protocol::SUBPROTOCOL;
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig};

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Path serving the WebSocket upgrade
    pub path: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Enable permissive CORS
    pub enable_cors: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "127.0.0.1".into(),
            path: "/graphql".into(),
            max_connections: Some(32),
            enable_cors: false,
        }
    }
}

/// Errors starting the transport server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state for the transport server.
struct AppState {
    config: TransportConfig,
    connection: ConnectionConfig,
    /// Connected client count (for health check and the connection limit)
    client_count: Arc<AtomicUsize>,
}

/// Accepts WebSocket upgrades and runs a [`Connection`] per socket.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
    client_count: Arc<AtomicUsize>,
}

impl TransportServer {
    /// Bind and start serving. Every accepted socket gets its own
    /// [`Connection`] configured from `connection`.
    pub async fn start(
        config: TransportConfig,
        connection: ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let client_count = Arc::new(AtomicUsize::new(0));

        let state = Arc::new(AppState {
            config: config.clone(),
            connection,
            client_count: client_count.clone(),
        });

        let mut app = Router::new()
            .route(&config.path, get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind((config.hostname.as_str(), config.port))
            .await
            .map_err(|source| TransportError::Bind {
                addr: format!("{}:{}", config.hostname, config.port),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!("graphql-ws transport listening on ws://{local_addr}{}", config.path);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("transport server failed: {e}");
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
            client_count,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected clients.
    pub fn connection_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Gracefully stop accepting connections.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("graphql-ws transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let limit = state.connection.read_limit;
    ws.protocols([SUBPROTOCOL])
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.client_count.load(Ordering::Relaxed),
        "operations": state.connection.operation_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let negotiated = socket
        .protocol()
        .and_then(|p| p.to_str().ok())
        .is_some_and(|p| p == SUBPROTOCOL);
    if !negotiated {
        warn!("Connection does not implement the {SUBPROTOCOL} protocol");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let active = state.client_count.fetch_add(1, Ordering::Relaxed) + 1;
    let (sink, stream) = socket.split();
    let (conn, task) = Connection::spawn(sink, stream, state.connection.clone());
    debug!(conn = %conn.id(), active, "client connected");

    if let Err(e) = task.await {
        error!(conn = %conn.id(), "connection task failed: {e}");
    }

    let remaining = state.client_count.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(conn = %conn.id(), remaining, "client disconnected");
}
