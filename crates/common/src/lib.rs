// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between room clients and the coordination server.
//! This module defines the WebSocket protocol messages and supporting types.
//!
//! Every message is a JSON object tagged by an `event` field carrying the
//! kebab-case event name, e.g. `{"event":"join","room_id":"r1",...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque room identifier
pub type RoomId = String;
/// Caller-asserted user identifier
pub type UserId = String;

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room's broadcast group
    /// # Fields
    /// * `user_email` - Identity used by the session guard when present
    /// * `claimed_host` - Informational only; authority comes from the room record
    Join {
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
        #[serde(default)]
        user_email: Option<String>,
        #[serde(default)]
        claimed_host: bool,
    },
    /// Leave the room this connection is bound to
    Leave { room_id: RoomId, user_id: UserId },
    /// Send a chat message
    /// # Fields
    /// * `recipient_id` - Required for `private`, optional target for `media`
    /// * `media` - Attachment for `media` messages
    SendChat {
        room_id: RoomId,
        sender_id: UserId,
        sender_name: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        kind: ChatKind,
        #[serde(default)]
        recipient_id: Option<UserId>,
        #[serde(default)]
        media: Option<MediaAttachment>,
    },
    /// Self-service mute
    ToggleMute {
        room_id: RoomId,
        user_id: UserId,
        muted: bool,
    },
    /// Raise or lower a hand; `raised` is the desired state, not a toggle
    RaiseHand {
        room_id: RoomId,
        user_id: UserId,
        raised: bool,
    },
    ToggleVideo {
        room_id: RoomId,
        user_id: UserId,
        has_video: bool,
    },
    ShareScreen {
        room_id: RoomId,
        user_id: UserId,
        is_sharing: bool,
    },
    SendReaction {
        room_id: RoomId,
        user_id: UserId,
        reaction: String,
    },
    WebrtcOffer {
        room_id: RoomId,
        target_user_id: UserId,
        payload: Value,
    },
    WebrtcAnswer {
        room_id: RoomId,
        target_user_id: UserId,
        payload: Value,
    },
    WebrtcIceCandidate {
        room_id: RoomId,
        target_user_id: UserId,
        payload: Value,
    },
    HostMuteParticipant {
        room_id: RoomId,
        acting_user_id: UserId,
        target_user_id: UserId,
        muted: bool,
    },
    HostKickParticipant {
        room_id: RoomId,
        acting_user_id: UserId,
        target_user_id: UserId,
    },
    /// Lock or unlock chat; the room stays joinable either way
    HostLockRoom {
        room_id: RoomId,
        acting_user_id: UserId,
        locked: bool,
    },
    HostSetMediaPermissions {
        room_id: RoomId,
        acting_user_id: UserId,
        allow_media: bool,
    },
    StartRecording {
        room_id: RoomId,
        acting_user_id: UserId,
    },
    StopRecording {
        room_id: RoomId,
        acting_user_id: UserId,
    },
    UpdatePermissions {
        room_id: RoomId,
        acting_user_id: UserId,
        settings: PermissionUpdate,
    },
    /// End the room for everyone; the acting identity is the one bound to the connection
    EndRoom { room_id: RoomId },
}

impl ClientMessage {
    /// Room the message is addressed to
    pub fn room_id(&self) -> &str {
        match self {
            ClientMessage::Join { room_id, .. }
            | ClientMessage::Leave { room_id, .. }
            | ClientMessage::SendChat { room_id, .. }
            | ClientMessage::ToggleMute { room_id, .. }
            | ClientMessage::RaiseHand { room_id, .. }
            | ClientMessage::ToggleVideo { room_id, .. }
            | ClientMessage::ShareScreen { room_id, .. }
            | ClientMessage::SendReaction { room_id, .. }
            | ClientMessage::WebrtcOffer { room_id, .. }
            | ClientMessage::WebrtcAnswer { room_id, .. }
            | ClientMessage::WebrtcIceCandidate { room_id, .. }
            | ClientMessage::HostMuteParticipant { room_id, .. }
            | ClientMessage::HostKickParticipant { room_id, .. }
            | ClientMessage::HostLockRoom { room_id, .. }
            | ClientMessage::HostSetMediaPermissions { room_id, .. }
            | ClientMessage::StartRecording { room_id, .. }
            | ClientMessage::StopRecording { room_id, .. }
            | ClientMessage::UpdatePermissions { room_id, .. }
            | ClientMessage::EndRoom { room_id } => room_id,
        }
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A participant was newly added to the room
    ParticipantJoined { participant: ParticipantInfo },
    ParticipantLeft { user_id: UserId },
    /// Full current participant list in join order
    ParticipantsUpdated { participants: Vec<ParticipantInfo> },
    ParticipantMuted { user_id: UserId, is_muted: bool },
    HandRaised { user_id: UserId, raised: bool },
    VideoToggled { user_id: UserId, has_video: bool },
    ScreenShareToggled { user_id: UserId, is_sharing: bool },
    ReactionSent { user_id: UserId, reaction: String },
    NewMessage { message: ChatMessage },
    /// Full chat replay, sent to a connection right after it joins
    ChatHistory { messages: Vec<ChatMessage> },
    WebrtcOffer { from_user_id: UserId, payload: Value },
    WebrtcAnswer { from_user_id: UserId, payload: Value },
    WebrtcIceCandidate { from_user_id: UserId, payload: Value },
    /// Targeted notice of a host action on the receiving participant
    HostAction { action: String, message: String },
    KickedFromRoom { room_id: RoomId, message: String },
    RoomClosed { room_id: RoomId },
    RecordingStarted { room_id: RoomId },
    RecordingStopped { room_id: RoomId },
    RoomSettingsUpdated {
        room_id: RoomId,
        settings: RoomSettings,
    },
    /// Targeted denial for the requesting connection
    ActionError {
        kind: ErrorKind,
        code: String,
        message: String,
    },
    /// Response for frames that are not a valid `ClientMessage`
    MalformedMessage { err_msg: String },
}

/// Events for room-directory listeners
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DirectoryEvent {
    RoomCreated { room: Room },
    RoomClosed { room_id: RoomId },
}

/// Denial category carried by `action-error`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Room or participant does not exist (anymore)
    NotFound,
    /// The caller is not allowed to do this
    Forbidden,
    /// The identity already has an active session
    DuplicateSession,
    /// Chat payload above the transport ceiling
    PayloadTooLarge,
    /// Malformed or out-of-range input
    Invalid,
    Internal,
}

/// Chat message routing class
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Public,
    Private,
    Media,
}

/// Media attached to a chat message, inline or by reference
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MediaAttachment {
    /// Inline payload, typically a data URL
    #[serde(default)]
    pub media_data: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl MediaAttachment {
    /// Bytes carried inline by the attachment
    pub fn inline_len(&self) -> usize {
        self.media_data.as_ref().map_or(0, String::len)
            + self.media_url.as_ref().map_or(0, String::len)
    }
}

/// A chat message as stored in room history
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub kind: ChatKind,
    /// Set iff the message is targeted
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub media: Option<MediaAttachment>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Whether only sender and recipient may see this message
    pub fn is_targeted(&self) -> bool {
        self.recipient_id.is_some()
    }

    /// Public messages are visible to everyone, targeted ones to both ends only
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        !self.is_targeted()
            || self.sender_id == user_id
            || self.recipient_id.as_deref() == Some(user_id)
    }
}

/// A participant as presented to clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub user_name: String,
    #[serde(default)]
    pub user_email: Option<String>,
    /// Join-time claim, informational only
    pub is_host: bool,
    pub is_muted: bool,
    pub has_video: bool,
    pub is_screen_sharing: bool,
    pub is_hand_raised: bool,
    pub joined_at: DateTime<Utc>,
}

/// Room record owned by the directory layer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Immutable after creation
    pub host_id: UserId,
    #[serde(default)]
    pub host_name: Option<String>,
    pub allow_chat: bool,
    pub allow_media: bool,
    pub allow_screen_share: bool,
    pub muted_by_default: bool,
    /// Chat lock: non-host senders are restricted to public messages
    pub locked: bool,
    pub is_recording: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Snapshot of the mutable settings
    pub fn settings(&self) -> RoomSettings {
        RoomSettings {
            allow_chat: self.allow_chat,
            allow_media: self.allow_media,
            allow_screen_share: self.allow_screen_share,
            muted_by_default: self.muted_by_default,
            locked: self.locked,
            is_recording: self.is_recording,
        }
    }
}

/// Room with its live participant count, for listings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub participant_count: usize,
}

/// Mutable room settings broadcast in `room-settings-updated`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    pub allow_chat: bool,
    pub allow_media: bool,
    pub allow_screen_share: bool,
    pub muted_by_default: bool,
    pub locked: bool,
    pub is_recording: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_chat: true,
            allow_media: false,
            allow_screen_share: false,
            muted_by_default: false,
            locked: false,
            is_recording: false,
        }
    }
}

/// Partial settings change requested by the host; absent fields are left alone
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionUpdate {
    #[serde(default)]
    pub allow_chat: Option<bool>,
    #[serde(default)]
    pub allow_media: Option<bool>,
    #[serde(default)]
    pub allow_screen_share: Option<bool>,
    #[serde(default)]
    pub muted_by_default: Option<bool>,
}

impl PermissionUpdate {
    pub fn is_empty(&self) -> bool {
        self.allow_chat.is_none()
            && self.allow_media.is_none()
            && self.allow_screen_share.is_none()
            && self.muted_by_default.is_none()
    }
}

/// WebRTC negotiation message class
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wrap an opaque payload into the outbound event for this kind
    pub fn into_message(self, from_user_id: UserId, payload: Value) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::WebrtcOffer {
                from_user_id,
                payload,
            },
            SignalKind::Answer => ServerMessage::WebrtcAnswer {
                from_user_id,
                payload,
            },
            SignalKind::IceCandidate => ServerMessage::WebrtcIceCandidate {
                from_user_id,
                payload,
            },
        }
    }
}
