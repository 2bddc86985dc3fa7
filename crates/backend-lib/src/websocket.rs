// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket Handler Module
//!
//! One `WebSocketHandler` exists per connection. It owns the connection id,
//! turns inbound frames into `ClientMessage`s and dispatches each one to the
//! component that owns the behaviour:
//! - `join`, `leave` and the self-service toggles go to presence
//! - `send-chat` goes to the chat fan-out
//! - `webrtc-*` goes to the signaling relay
//! - host events go to the host authority
//!
//! Outbound traffic never flows through the handler's return value. Components
//! enqueue broadcasts on the per-connection channels while holding the room
//! lock; the handler only answers denials with a targeted `action-error`.
//!
//! Requests that name a user (`sender_id`, `acting_user_id`, ...) must name the
//! user this connection joined as. A client cannot act on another user's behalf
//! by putting their id in the payload.

use crate::chat::ChatRequest;
use crate::error::AppError;
use crate::presence::JoinRequest;
use crate::registry::{Binding, ConnectionId, Outbound};
use crate::validation;
use crate::AppState;
use roomsync_common::{ClientMessage, ServerMessage, SignalKind};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// WebSocket handler for processing messages
pub struct WebSocketHandler {
    state: Arc<AppState>,
    connection_id: ConnectionId,
}

impl WebSocketHandler {
    /// Register a new connection whose outbound queue is `tx`
    pub fn new(state: Arc<AppState>, tx: Outbound) -> Self {
        let connection_id = Uuid::new_v4();
        state.registry.register_connection(connection_id, tx);
        debug!(%connection_id, "connection registered");
        Self {
            state,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Handle one text frame. Nothing here is fatal to the connection.
    pub fn handle_text(&self, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "malformed frame");
                self.reply(ServerMessage::MalformedMessage {
                    err_msg: e.to_string(),
                });
                return;
            },
        };

        let result = validation::validate_client_message(&msg)
            .map_err(AppError::from)
            .and_then(|()| self.handle_message(msg));

        if let Err(e) = result {
            warn!(
                connection_id = %self.connection_id,
                code = e.error_code(),
                error = %e,
                "request denied"
            );
            self.reply(e.to_action_error());
        }
    }

    /// # Handle a validated client message
    ///
    /// Dispatches to one component per event and returns the denial, if any.
    pub fn handle_message(&self, msg: ClientMessage) -> Result<(), AppError> {
        let conn = self.connection_id;
        let state = &self.state;

        match msg {
            ClientMessage::Join {
                room_id,
                user_id,
                user_name,
                user_email,
                claimed_host,
            } => {
                state.presence.join(
                    conn,
                    JoinRequest {
                        room_id,
                        user_id,
                        user_name,
                        user_email: user_email
                            .map(|e| e.trim().to_string())
                            .filter(|e| !e.is_empty()),
                        claimed_host,
                    },
                )?;
            },
            ClientMessage::Leave { room_id, user_id } => {
                state.presence.leave(conn, &room_id, &user_id)?;
            },
            ClientMessage::SendChat {
                room_id,
                sender_id,
                sender_name,
                body,
                kind,
                recipient_id,
                media,
            } => {
                self.acting_as(&room_id, &sender_id)?;
                state.chat.send(
                    &room_id,
                    &conn,
                    ChatRequest {
                        sender_id,
                        sender_name,
                        body,
                        kind,
                        recipient_id,
                        media,
                    },
                )?;
            },
            ClientMessage::ToggleMute {
                room_id,
                user_id,
                muted,
            } => state.presence.set_muted(&conn, &room_id, &user_id, muted)?,
            ClientMessage::RaiseHand {
                room_id,
                user_id,
                raised,
            } => state.presence.set_hand_raised(&conn, &room_id, &user_id, raised)?,
            ClientMessage::ToggleVideo {
                room_id,
                user_id,
                has_video,
            } => state.presence.set_video(&conn, &room_id, &user_id, has_video)?,
            ClientMessage::ShareScreen {
                room_id,
                user_id,
                is_sharing,
            } => state.presence.set_screen_share(&conn, &room_id, &user_id, is_sharing)?,
            ClientMessage::SendReaction {
                room_id,
                user_id,
                reaction,
            } => state.presence.send_reaction(&conn, &room_id, &user_id, reaction)?,
            ClientMessage::WebrtcOffer {
                room_id,
                target_user_id,
                payload,
            } => self.relay(&room_id, &target_user_id, SignalKind::Offer, payload),
            ClientMessage::WebrtcAnswer {
                room_id,
                target_user_id,
                payload,
            } => self.relay(&room_id, &target_user_id, SignalKind::Answer, payload),
            ClientMessage::WebrtcIceCandidate {
                room_id,
                target_user_id,
                payload,
            } => self.relay(&room_id, &target_user_id, SignalKind::IceCandidate, payload),
            ClientMessage::HostMuteParticipant {
                room_id,
                acting_user_id,
                target_user_id,
                muted,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state
                    .host
                    .set_mute(&room_id, &acting_user_id, &target_user_id, muted)?;
            },
            ClientMessage::HostKickParticipant {
                room_id,
                acting_user_id,
                target_user_id,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state.host.kick(&room_id, &acting_user_id, &target_user_id)?;
            },
            ClientMessage::HostLockRoom {
                room_id,
                acting_user_id,
                locked,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state.host.set_locked(&room_id, &acting_user_id, locked)?;
            },
            ClientMessage::HostSetMediaPermissions {
                room_id,
                acting_user_id,
                allow_media,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state
                    .host
                    .set_media_permission(&room_id, &acting_user_id, allow_media)?;
            },
            ClientMessage::StartRecording {
                room_id,
                acting_user_id,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state.host.set_recording(&room_id, &acting_user_id, true)?;
            },
            ClientMessage::StopRecording {
                room_id,
                acting_user_id,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state.host.set_recording(&room_id, &acting_user_id, false)?;
            },
            ClientMessage::UpdatePermissions {
                room_id,
                acting_user_id,
                settings,
            } => {
                self.acting_as(&room_id, &acting_user_id)?;
                state
                    .host
                    .set_participant_permissions(&room_id, &acting_user_id, settings)?;
            },
            ClientMessage::EndRoom { room_id } => {
                let binding = self.bound_to(&room_id)?;
                state.host.end_room(&room_id, &binding.user_id)?;
            },
        }
        Ok(())
    }

    /// Signals come from whoever this connection joined as; unbound senders are ignored
    fn relay(
        &self,
        room_id: &str,
        target_user_id: &str,
        kind: SignalKind,
        payload: serde_json::Value,
    ) {
        match self.bound_to(room_id) {
            Ok(binding) => {
                self.state
                    .signaling
                    .relay(room_id, &binding.user_id, target_user_id, kind, payload);
            },
            Err(_) => debug!(
                connection_id = %self.connection_id,
                room_id,
                "signal from unjoined connection dropped"
            ),
        }
    }

    fn bound_to(&self, room_id: &str) -> Result<Binding, AppError> {
        self.state
            .registry
            .binding(&self.connection_id)
            .filter(|b| b.room_id == room_id)
            .ok_or_else(|| AppError::NotJoined(room_id.to_string()))
    }

    fn acting_as(&self, room_id: &str, user_id: &str) -> Result<Binding, AppError> {
        let binding = self.bound_to(room_id)?;
        if binding.user_id != user_id {
            return Err(AppError::NotSelf);
        }
        Ok(binding)
    }

    fn reply(&self, msg: ServerMessage) {
        self.state.registry.send_to_connection(&self.connection_id, msg);
    }

    /// Transport closed; leaves the bound room and forgets the connection
    pub fn disconnect(&self) {
        self.state.presence.disconnect(self.connection_id);
        debug!(connection_id = %self.connection_id, "connection closed");
    }
}
