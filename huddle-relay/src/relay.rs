//! Relay server: shared state, WebSocket handler, and server startup.
//!
//! Every accepted WebSocket becomes a participant in the shared [`Room`].
//! A connection is served by two tasks: a reader that hands each text frame
//! to the room, and a writer that drains the participant's bounded outbound
//! queue onto the socket. When either side ends, the participant is removed
//! and its departure announced.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use huddle_proto::peer::PeerId;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::room::Room;

/// Default maximum accepted inbound frame size in bytes (64 KB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default capacity of a connection's outbound queue.
const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Shared relay state: the room plus per-connection limits.
pub struct RelayState {
    /// Registry of connected participants.
    pub room: Room,
    /// Largest accepted inbound text frame in bytes.
    max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    outbound_queue_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty room and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            room: Room::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }

    /// Creates relay state with custom limits around the given room.
    #[must_use]
    pub fn with_config(max_message_size: usize, outbound_queue_size: usize, room: Room) -> Self {
        Self {
            room,
            max_message_size,
            outbound_queue_size: outbound_queue_size.max(1),
        }
    }

    /// Creates relay state from a resolved [`RelayConfig`].
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_config(
            config.max_message_size,
            config.outbound_queue_size,
            Room::with_default_name(config.default_name.clone()),
        )
    }

    /// Hands one inbound text frame to the room, dropping oversize frames.
    fn handle_text_frame(&self, peer_id: &PeerId, text: &str) {
        if text.len() > self.max_message_size {
            tracing::warn!(
                peer_id = %peer_id,
                size = text.len(),
                max = self.max_message_size,
                "dropping oversize message"
            );
            return;
        }
        self.room.handle_text(peer_id, text);
    }
}

/// Handles an upgraded WebSocket connection for a single participant.
///
/// The connection lifecycle:
/// 1. Register the participant and obtain its identity.
/// 2. Spawn the writer (outbound queue → socket) and reader (socket → room).
/// 3. When either finishes, abort the other.
/// 4. Remove the participant, announcing its departure.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(state.outbound_queue_size);
    let peer_id = state.room.connect(tx);
    tracing::info!(peer_id = %peer_id, "participant connected");

    // The room holds the only queue sender; when it drops the participant the
    // queue closes and the writer finishes with a close frame.
    let writer_peer_id = peer_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!(peer_id = %writer_peer_id, error = %e, "WebSocket write failed");
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let reader_peer_id = peer_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    reader_state.handle_text_frame(&reader_peer_id, text.as_str());
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(peer_id = %reader_peer_id, "received close frame");
                    break;
                }
                Ok(_) => {
                    // Ignore binary, ping, pong frames.
                }
                Err(e) => {
                    tracing::warn!(peer_id = %reader_peer_id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.room.disconnect(&peer_id) {
        tracing::info!(peer_id = %peer_id, "participant disconnected");
    } else {
        tracing::info!(peer_id = %peer_id, "connection closed after eviction");
    }
}

/// Starts the relay on the given address with default state and returns the
/// bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay with a pre-configured [`RelayState`].
///
/// The WebSocket upgrade is served on both `/` and `/ws`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(ws_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
