//! WebSocket handler for Axum
//!
//! Handles WebSocket upgrade, authentication, and event routing.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream, StreamExt},
    SinkExt,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use supportchat_shared::{ChatError, Identity};
use tokio::sync::mpsc;

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::routes::extract_client_ip;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    hub::ChatHub,
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket.
///
/// A token on the query string (or an `Authorization` header) is verified before the
/// upgrade and rejected with 401. Without one, the first frame must be `authenticate`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));

    let identity = match token {
        Some(token) => match app_state.verifier.verify(&token) {
            Ok(identity) => Some(identity),
            Err(_) => {
                tracing::warn!("WebSocket auth failed: invalid token");
                return Err(ApiError::InvalidToken);
            }
        },
        None => None,
    };

    let ip_address = extract_client_ip(&headers)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()));

    tracing::info!(
        user_id = ?identity.map(|i| i.user_id),
        "WebSocket connection upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, identity, ip_address, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    identity: Option<Identity>,
    ip_address: Option<String>,
    app_state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match identity {
        Some(identity) => identity,
        None => match authenticate_handshake(&mut receiver, &app_state).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(error = %err, "WebSocket handshake rejected");
                reject(&mut sender, &err).await;
                return;
            }
        },
    };

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let hub = Arc::clone(&app_state.hub);
    let conn = hub.connect(identity, ip_address, tx).await;
    let session_id = conn.session_id;

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else {
            break;
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(event, &conn, &hub).await,
                Err(e) => {
                    tracing::warn!(error = ?e, session_id = %session_id, "Failed to parse client event");
                    let _ = conn.send(ServerEvent::error(&ChatError::validation(
                        "Invalid event format",
                    )));
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, user_id = %identity.user_id, "WebSocket connection closing");
    hub.disconnect(session_id).await;

    send_task.abort();
}

/// Wait for an `authenticate` frame within the configured timeout
async fn authenticate_handshake(
    receiver: &mut SplitStream<WebSocket>,
    app_state: &AppState,
) -> Result<Identity, ChatError> {
    let first_frame = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(ClientEvent::Authenticate { token }) => {
                            app_state.verifier.verify(&token)
                        }
                        _ => Err(ChatError::Authentication),
                    };
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                _ => break,
            }
        }
        Err(ChatError::Authentication)
    };

    tokio::time::timeout(app_state.config.auth_timeout, first_frame)
        .await
        .unwrap_or(Err(ChatError::Authentication))
}

/// Send a final error frame and close
async fn reject(sender: &mut SplitSink<WebSocket, Message>, err: &ChatError) {
    if let Ok(json) = serde_json::to_string(&ServerEvent::error(err)) {
        let _ = sender.send(Message::Text(json)).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}

/// Handle client event
async fn handle_client_event(event: ClientEvent, conn: &Arc<Connection>, hub: &ChatHub) {
    use ClientEvent::*;

    let result = match event {
        Authenticate { .. } => Err(ChatError::validation("Connection is already authenticated")),

        OpenThread => hub
            .open_thread(conn)
            .await
            .map(|thread| conn.send(ServerEvent::ThreadOpened { thread })),

        Join { thread_id } => hub
            .join(conn, thread_id)
            .await
            .map(|_| conn.send(ServerEvent::Joined { thread_id })),

        Leave => {
            if let Some(thread_id) = hub.leave(conn).await {
                let _ = conn.send(ServerEvent::Left { thread_id });
            }
            Ok(Ok(()))
        }

        // The sender sees its own message through the room broadcast
        Send { thread_id, text } => hub.send(conn, thread_id, &text).await.map(|_| Ok(())),

        Ping => Ok(conn.send(ServerEvent::Pong)),
    };

    if let Err(err) = result {
        tracing::debug!(
            session_id = %conn.session_id,
            code = err.code(),
            "Client event rejected"
        );
        let _ = conn.send(ServerEvent::error(&err));
    }
}
