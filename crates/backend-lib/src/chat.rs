// ============================
// crates/backend-lib/src/chat.rs
// ============================
//! Chat fan-out: validation, history and routing of chat messages.
use crate::error::AppError;
use crate::metrics::{CHAT_REJECTED, CHAT_SENT};
use crate::registry::{ConnectionId, Registry};
use chrono::Utc;
use metrics::counter;
use roomsync_common::{ChatKind, ChatMessage, MediaAttachment, ServerMessage, UserId};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A send request as received from a client
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub kind: ChatKind,
    pub recipient_id: Option<UserId>,
    pub media: Option<MediaAttachment>,
}

impl ChatRequest {
    pub fn public(
        sender_id: impl Into<UserId>,
        sender_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body: body.into(),
            kind: ChatKind::Public,
            recipient_id: None,
            media: None,
        }
    }

    pub fn private(
        sender_id: impl Into<UserId>,
        sender_name: impl Into<String>,
        recipient_id: impl Into<UserId>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChatKind::Private,
            recipient_id: Some(recipient_id.into()),
            ..Self::public(sender_id, sender_name, body)
        }
    }

    fn payload_len(&self) -> usize {
        self.body.len() + self.media.as_ref().map_or(0, MediaAttachment::inline_len)
    }
}

pub struct ChatFanout {
    registry: Arc<Registry>,
    max_payload_bytes: usize,
}

impl ChatFanout {
    pub fn new(registry: Arc<Registry>, max_payload_bytes: usize) -> Self {
        Self {
            registry,
            max_payload_bytes,
        }
    }

    /// Validate, record and deliver a chat message.
    ///
    /// Public messages go to the whole room. Targeted ones (private, or media
    /// with a recipient) go to the sender's connection and the recipient's
    /// current connection only; an absent recipient gets it from history on
    /// their next join.
    pub fn send(
        &self,
        room_id: &str,
        sender_connection: &ConnectionId,
        request: ChatRequest,
    ) -> Result<ChatMessage, AppError> {
        let result = self.try_send(room_id, sender_connection, request);
        match &result {
            Ok(message) => {
                counter!(CHAT_SENT).increment(1);
                debug!(room_id, message_id = %message.id, kind = ?message.kind, "chat delivered");
            },
            Err(e) => {
                counter!(CHAT_REJECTED).increment(1);
                warn!(room_id, error = %e, "chat rejected");
            },
        }
        result
    }

    fn try_send(
        &self,
        room_id: &str,
        sender_connection: &ConnectionId,
        request: ChatRequest,
    ) -> Result<ChatMessage, AppError> {
        let size = request.payload_len();
        if size > self.max_payload_bytes {
            return Err(AppError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        let recipient_id = match request.kind {
            ChatKind::Public => None,
            ChatKind::Private => Some(request.recipient_id.clone().ok_or_else(|| {
                AppError::InvalidInput("Private messages need a recipient".to_string())
            })?),
            ChatKind::Media => {
                if request.media.is_none() {
                    return Err(AppError::InvalidInput(
                        "Media messages need an attachment".to_string(),
                    ));
                }
                request.recipient_id.clone()
            },
        };

        self.registry.with_room(room_id, |entry| {
            match entry.record() {
                Some(room) => {
                    if !room.allow_chat {
                        return Err(AppError::ChatDisabled);
                    }
                    if request.kind == ChatKind::Media && !room.allow_media {
                        return Err(AppError::MediaDisabled);
                    }
                    if room.locked && recipient_id.is_some() && room.host_id != request.sender_id {
                        return Err(AppError::ChatLocked);
                    }
                },
                None if entry.participant_count() == 0 => {
                    return Err(AppError::RoomNotFound(room_id.to_string()));
                },
                None => {},
            }

            let message = ChatMessage {
                id: Uuid::new_v4().to_string(),
                room_id: room_id.to_string(),
                sender_id: request.sender_id,
                sender_name: request.sender_name,
                body: request.body,
                kind: request.kind,
                recipient_id,
                media: request.media,
                created_at: Utc::now(),
            };
            entry.append_chat(message.clone());

            let event = ServerMessage::NewMessage {
                message: message.clone(),
            };
            match &message.recipient_id {
                Some(recipient) => {
                    self.registry.send_to_connection(sender_connection, event.clone());
                    let recipient_conn = entry.participant(recipient).map(|p| p.connection_id);
                    if let Some(conn) = recipient_conn.filter(|c| c != sender_connection) {
                        entry.send_to(&conn, event);
                    }
                },
                None => entry.broadcast(&event),
            }

            Ok(message)
        })
    }
}
