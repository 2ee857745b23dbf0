//! WebSocket authentication against a live server on a loopback port

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use supportchat_api::{
    attachments::MemoryAttachmentStore, auth::JwtManager, create_router, store::MemoryChatStore,
    AppState, Config,
};
use supportchat_shared::Identity;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

const SECRET: &str = "test-secret-key-at-least-32-characters-long";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    url: String,
    state: AppState,
    jwt: JwtManager,
}

impl TestServer {
    async fn start(auth_timeout: Duration) -> Self {
        let mut config = Config::for_tests(SECRET);
        config.auth_timeout = auth_timeout;
        let state = AppState::new(
            config,
            Arc::new(MemoryChatStore::new()),
            Arc::new(MemoryAttachmentStore::new()),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            url: format!("ws://{addr}/api/v1/ws/chat"),
            state,
            jwt: JwtManager::new(SECRET, 1),
        }
    }

    fn token(&self, identity: Identity) -> String {
        self.jwt
            .generate_token(identity.user_id, identity.role)
            .unwrap()
            .0
    }

    async fn open(&self) -> Socket {
        connect_async(self.url.as_str()).await.unwrap().0
    }

    async fn live_connections(&self) -> usize {
        self.state.hub.sockets().get_stats().await.active_connections
    }
}

/// Next JSON event, or `None` once the server closes the socket
async fn next_event(socket: &mut Socket) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("server went silent");
        match frame {
            Some(Ok(WsMessage::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
            _ => return None,
        }
    }
}

async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let event = next_event(socket).await.expect("socket closed");
        if event["type"] == kind {
            return event;
        }
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(WsMessage::Text(value.to_string())).await.unwrap();
}

/// Give the server a moment to run its disconnect cleanup
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_invalid_query_token_is_refused_before_upgrade() {
    let server = TestServer::start(Duration::from_secs(2)).await;

    let result = connect_async(format!("{}?token=not-a-jwt", server.url)).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
    }
    assert_eq!(server.live_connections().await, 0);
}

#[tokio::test]
async fn test_query_token_connects_immediately() {
    let server = TestServer::start(Duration::from_secs(2)).await;
    let customer = Identity::customer(Uuid::new_v4());

    let (mut socket, _) = connect_async(format!("{}?token={}", server.url, server.token(customer)))
        .await
        .unwrap();

    let connected = next_event(&mut socket).await.unwrap();
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["user_id"], customer.user_id.to_string());
}

#[tokio::test]
async fn test_silent_socket_is_dropped_after_auth_timeout() {
    let server = TestServer::start(Duration::from_millis(200)).await;
    let mut socket = server.open().await;

    let event = next_event(&mut socket).await.unwrap();
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], "authentication_failed");
    assert!(next_event(&mut socket).await.is_none());

    settle().await;
    assert_eq!(server.live_connections().await, 0);
}

#[tokio::test]
async fn test_bad_authenticate_frame_is_rejected_and_closed() {
    let server = TestServer::start(Duration::from_secs(2)).await;
    let mut socket = server.open().await;

    send_json(&mut socket, json!({"type": "authenticate", "token": "forged"})).await;

    let event = next_event(&mut socket).await.unwrap();
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], "authentication_failed");
    assert!(next_event(&mut socket).await.is_none());
    assert_eq!(server.live_connections().await, 0);
}

#[tokio::test]
async fn test_first_frame_must_be_authenticate() {
    let server = TestServer::start(Duration::from_secs(2)).await;
    let mut socket = server.open().await;

    send_json(&mut socket, json!({"type": "open_thread"})).await;

    let event = next_event(&mut socket).await.unwrap();
    assert_eq!(event["code"], "authentication_failed");
    assert!(next_event(&mut socket).await.is_none());
}

#[tokio::test]
async fn test_authenticate_frame_then_chat() {
    let server = TestServer::start(Duration::from_secs(2)).await;
    let customer = Identity::customer(Uuid::new_v4());
    let mut socket = server.open().await;

    send_json(
        &mut socket,
        json!({"type": "authenticate", "token": server.token(customer)}),
    )
    .await;
    let connected = next_event(&mut socket).await.unwrap();
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["role"], "customer");

    send_json(&mut socket, json!({"type": "open_thread"})).await;
    let opened = next_of_type(&mut socket, "thread_opened").await;
    let thread_id = opened["thread"]["id"].as_str().unwrap().to_string();

    send_json(
        &mut socket,
        json!({"type": "send", "thread_id": thread_id, "text": "  hello there  "}),
    )
    .await;
    let message = next_of_type(&mut socket, "message").await;
    assert_eq!(message["message"]["text"], "hello there");

    socket.close(None).await.unwrap();
    settle().await;
    assert_eq!(server.live_connections().await, 0);
}
