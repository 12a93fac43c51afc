use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use palaver_store::{Database, MessageRepo, UserRepo};

use crate::broadcast::Broadcaster;
use crate::dispatcher::Dispatcher;
use crate::presence;
use crate::registry::ConnectionRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound frames queued per connection before it counts as dead.
    pub max_send_queue: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// History entries sent on login.
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            max_send_queue: 256,
            max_frame_bytes: 2_000_000,
            history_limit: 80,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    dispatcher: Arc<Dispatcher>,
    max_send_queue: usize,
    max_frame_bytes: usize,
}

/// Build the Axum router with all routes.
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. The returned handle keeps it alive.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        broadcaster.clone(),
        UserRepo::new(db.clone()),
        MessageRepo::new(db),
        config.history_limit,
    ));

    let state = AppState {
        registry,
        broadcaster,
        dispatcher,
        max_send_queue: config.max_send_queue,
        max_frame_bytes: config.max_frame_bytes,
    };

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "chat server listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()`. Holds the accept loop task alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler. Oversize frames fail only their own
/// connection.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
    }))
}

/// One connection: register a session, pump outbound frames from the
/// session queue on a writer task, and process inbound frames here,
/// strictly one at a time.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, rx) = mpsc::channel(state.max_send_queue);
    let conn_id = state.registry.register(tx);
    tracing::info!(conn_id = %conn_id, "connection open");

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_outbound(ws_tx, rx));

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => state.dispatcher.handle(&conn_id, text.as_str()).await,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Cleanly or not, the connection is done: drop the session and tell
    // the room if an authenticated user just left. The broadcast sweep
    // may already have evicted us, in which case this is a no-op.
    if state.registry.unregister(&conn_id) {
        state
            .broadcaster
            .broadcast(&presence::presence_frame(&state.registry));
    }
    tracing::info!(conn_id = %conn_id, "connection closed");

    writer.abort();
}

/// Writer task: forward queued frames to the socket, with a periodic
/// heartbeat ping to surface dead transports.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
