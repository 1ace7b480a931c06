//! WebSocket endpoint for browser clients.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use dockwatch_core::{LocalSession, Session};
use dockwatch_server::Server;
use futures::{SinkExt, StreamExt};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub server: Arc<Server>,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: Option<usize>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    let ws = match state.max_message_size {
        Some(limit) => ws.max_message_size(limit),
        None => ws,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state.server))
}

async fn handle_socket(socket: WebSocket, server: Arc<Server>) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut rx) = LocalSession::new();
    let session: Arc<dyn Session> = Arc::new(session);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    server.connect(Arc::clone(&session)).await;

    // Frames of one client are handled strictly in order.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                server
                    .handle(&session, Some(text.as_str().as_bytes()))
                    .await;
            }
            Ok(Message::Binary(data)) => server.handle(&session, Some(&data[..])).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session = session.id(), "WebSocket error: {e}");
                break;
            }
        }
    }

    server.disconnect(&session).await;
    send_task.abort();
}

/// Router serving the console socket on `/ws`.
#[must_use]
pub fn create_ws_router(server: Arc<Server>, max_message_size: Option<usize>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(WsState {
            server,
            max_message_size,
        })
}
