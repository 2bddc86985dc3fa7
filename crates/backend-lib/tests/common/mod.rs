//! Shared setup for the integration tests: a real server on an ephemeral port
//! and a few helpers for driving it over WebSocket.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use roomsync_backend::{config::Settings, registry::NewRoom, ws_router, AppState};
use roomsync_common::ServerMessage;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings suitable for tests: short grace window, small payload ceiling
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.rooms.eviction_grace_ms = 200;
    settings.transport.max_message_bytes = 8 * 1024;
    settings
}

/// Start a server on `127.0.0.1:0`
pub async fn setup_server(settings: Settings) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(settings));
    let app = ws_router::create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

pub fn create_room(state: &AppState, id: &str, host: &str) {
    state
        .registry
        .create_room(NewRoom::new(format!("Room {id}"), host).with_id(id))
        .unwrap();
}

pub async fn connect(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("Failed to connect");
    ws
}

pub async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next server message, failing the test after `secs`
pub async fn next_message(ws: &mut Ws, secs: u64) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(secs), ws.next())
            .await
            .expect("Timed out waiting for a message")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("Unparseable server message");
        }
    }
}

/// Read until a message matches `pred`, returning it
pub async fn recv_until(ws: &mut Ws, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        let msg = next_message(ws, 5).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// True if nothing arrives within `ms`
pub async fn is_quiet(ws: &mut Ws, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), ws.next())
        .await
        .is_err()
}

/// Join and wait for the room-settings snapshot that ends the join sequence
pub async fn join(ws: &mut Ws, room_id: &str, user_id: &str) {
    send(
        ws,
        serde_json::json!({
            "event": "join", "room_id": room_id, "user_id": user_id, "user_name": user_id
        }),
    )
    .await;
    recv_until(ws, |m| matches!(m, ServerMessage::RoomSettingsUpdated { .. })).await;
}
