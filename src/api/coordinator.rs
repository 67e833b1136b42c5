//! Validator transport and coordinator introspection
//!
//! Endpoints:
//!   GET /ws -> WebSocket upgrade for validators
//!   GET /coordinator/stats -> Session, callback and discard counters

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::middleware::client_ip;
use crate::coordinator::{Coordinator, CoordinatorStats, OutgoingMessage};

#[derive(Clone)]
pub struct CoordinatorApiState {
    pub coordinator: Arc<Coordinator>,
    /// Take the validator address from proxy headers instead of the socket
    pub trust_proxy_headers: bool,
}

async fn validator_socket(
    ws: WebSocketUpgrade,
    State(state): State<CoordinatorApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let peer =
        client_ip(&headers, Some(&addr), state.trust_proxy_headers).unwrap_or_else(|| addr.ip());
    ws.on_upgrade(move |socket| handle_validator_socket(state.coordinator, socket, peer))
}

async fn handle_validator_socket(coordinator: Arc<Coordinator>, socket: WebSocket, peer: IpAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();
    let connection = coordinator.open_connection(peer, tx);

    info!(session = connection.id, "Validator WebSocket connected");

    // Drains the session queue so dispatch never waits on a slow socket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                coordinator.handle_frame(&connection, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                debug!(session = connection.id, "Close frame received");
                break;
            }
            Err(e) => {
                debug!(session = connection.id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    coordinator.disconnect(&connection).await;
    writer.abort();
}

async fn coordinator_stats(State(state): State<CoordinatorApiState>) -> Json<CoordinatorStats> {
    Json(state.coordinator.stats().await)
}

/// Create coordinator router (mounted at the root)
pub fn create_router(state: CoordinatorApiState) -> Router {
    Router::new()
        .route("/ws", get(validator_socket))
        .route("/coordinator/stats", get(coordinator_stats))
        .with_state(state)
}
