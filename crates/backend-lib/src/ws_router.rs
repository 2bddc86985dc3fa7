// ============================
// roomsync-backend/src/ws_router.rs
// ============================
//! HTTP surface: the WebSocket endpoints, the REST room directory and health.
use crate::error::AppError;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::registry::NewRoom;
use crate::validation;
use crate::websocket::WebSocketHandler;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use roomsync_common::{
    ChatMessage, DirectoryEvent, ParticipantInfo, PermissionUpdate, Room, RoomSummary,
    ServerMessage, UserId,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Room for the JSON envelope around a payload that is exactly at the limit
const ENVELOPE_SLACK_BYTES: usize = 64 * 1024;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.settings.server.cors_origin.as_deref());

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/directory", get(directory_handler))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/{id}", get(get_room).delete(end_room))
        .route("/api/rooms/{id}/participants", get(list_participants))
        .route("/api/rooms/{id}/messages", get(list_messages))
        .route("/api/rooms/{id}/settings", axum::routing::put(update_settings))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!(origin, "invalid cors origin, cross-origin requests will be refused");
            layer
        },
    }
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);

    // over-size chat must reach the chat component to be refused politely
    let limit = state.settings.transport.max_message_bytes + ENVELOPE_SLACK_BYTES;
    ws.max_message_size(limit)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    gauge!(WS_ACTIVE).increment(1.0);
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let handler = WebSocketHandler::new(state, tx);
    let connection_id = handler.connection_id();
    info!(%connection_id, "websocket connected");

    // Writer: drains this connection's queue in order
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(%connection_id, error = %e, "failed to serialize outbound message");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handler.handle_text(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => handler.handle_text(text),
                Err(_) => debug!(%connection_id, "ignoring non-utf8 binary frame"),
            },
            Message::Close(_) => break,
            _ => {},
        }
    }

    handler.disconnect();
    gauge!(WS_ACTIVE).decrement(1.0);
    info!(%connection_id, "websocket disconnected");

    send_task.abort();
}

/// Read-only stream of room created/closed notices
pub async fn directory_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let events = state.subscribe_directory();
    ws.on_upgrade(move |socket| stream_directory(socket, events))
}

async fn stream_directory(socket: WebSocket, mut events: broadcast::Receiver<DirectoryEvent>) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "directory listener lagging");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {},
            },
        }
    }
}

// ---- REST directory ----

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(meta): Json<NewRoom>,
) -> Result<(StatusCode, Json<Room>), AppError> {
    if let Some(id) = meta.id.as_deref() {
        validation::validate_room_id(id)?;
    }
    validation::validate_title(&meta.title)?;
    validation::validate_user_id(&meta.host_id)?;

    let room = state.registry.create_room(meta)?;
    state.publish_directory(DirectoryEvent::RoomCreated { room: room.clone() });
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.list_rooms())
}

pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Room>, AppError> {
    state
        .registry
        .get_room(&id)
        .map(Json)
        .ok_or(AppError::RoomNotFound(id))
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ParticipantInfo>>, AppError> {
    Ok(Json(state.registry.list_participants(&id)?))
}

/// Public transcript; targeted messages stay between their two ends
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let mut messages = state.registry.chat_history(&id)?;
    messages.retain(|m| !m.is_targeted());
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub host_id: UserId,
    #[serde(flatten)]
    pub update: PermissionUpdate,
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SettingsRequest>,
) -> Result<Json<Room>, AppError> {
    let room = state
        .host
        .set_participant_permissions(&id, &request.host_id, request.update)?;
    Ok(Json(room))
}

#[derive(Debug, Deserialize)]
pub struct HostQuery {
    pub host_id: UserId,
}

pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HostQuery>,
) -> Result<StatusCode, AppError> {
    state.host.end_room(&id, &query.host_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.registry.room_count(),
        "connections": state.registry.connection_count(),
    }))
}
