// ============================
// crates/backend-lib/src/validation.rs
// ============================
//! Message validation module.

use crate::error::AppError;
use regex::Regex;
use roomsync_common::ClientMessage;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_USER_ID_LENGTH: usize = 128;
const MAX_DISPLAY_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321 SMTP limit
const MAX_TITLE_LENGTH: usize = 200;
const MAX_REACTION_LENGTH: usize = 32;
/// Text bodies are small; media travels in the attachment and is bounded by the transport ceiling
pub const MAX_CHAT_BODY_CHARS: usize = 4000;

static ROOM_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Invalid chat message: {0}")]
    InvalidChat(String),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a room ID
pub fn validate_room_id(room_id: &str) -> ValidationResult<&str> {
    if !ROOM_ID_REGEX.is_match(room_id) {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must be 1-64 alphanumeric characters, hyphens or underscores".to_string(),
        ));
    }
    Ok(room_id)
}

/// Validate a user ID
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    if user_id.is_empty() {
        return Err(ValidationError::InvalidUserId(
            "User ID must not be empty".to_string(),
        ));
    }
    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(ValidationError::InvalidUserId(format!(
            "User ID cannot exceed {MAX_USER_ID_LENGTH} characters"
        )));
    }
    if user_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidUserId(
            "User ID contains control characters".to_string(),
        ));
    }
    Ok(user_id)
}

/// Validate a display name or title of at most `max` characters
fn validate_text(value: &str, what: &str, max: usize) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidName(format!("{what} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(ValidationError::InvalidName(format!(
            "{what} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> ValidationResult<&str> {
    validate_text(name, "Name", MAX_DISPLAY_NAME_LENGTH)?;
    Ok(name)
}

pub fn validate_title(title: &str) -> ValidationResult<&str> {
    validate_text(title, "Title", MAX_TITLE_LENGTH)?;
    Ok(title)
}

/// Validate an email address
pub fn validate_email(email: &str) -> ValidationResult<&str> {
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::InvalidEmail(format!(
            "Email cannot exceed {MAX_EMAIL_LENGTH} characters"
        )));
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(ValidationError::InvalidEmail(
            "Invalid email format".to_string(),
        ));
    }
    Ok(email)
}

/// Shape checks that do not need room state
pub fn validate_client_message(msg: &ClientMessage) -> ValidationResult<()> {
    validate_room_id(msg.room_id())?;

    match msg {
        ClientMessage::Join {
            user_id,
            user_name,
            user_email,
            ..
        } => {
            validate_user_id(user_id)?;
            validate_display_name(user_name)?;
            let email = user_email.as_deref().map(str::trim);
            if let Some(email) = email.filter(|e| !e.is_empty()) {
                validate_email(email)?;
            }
        },
        ClientMessage::SendChat {
            sender_id,
            sender_name,
            body,
            recipient_id,
            ..
        } => {
            validate_user_id(sender_id)?;
            validate_display_name(sender_name)?;
            if body.chars().count() > MAX_CHAT_BODY_CHARS {
                return Err(ValidationError::InvalidChat(format!(
                    "Message cannot exceed {MAX_CHAT_BODY_CHARS} characters"
                )));
            }
            if let Some(recipient) = recipient_id {
                validate_user_id(recipient)?;
            }
        },
        ClientMessage::SendReaction {
            user_id, reaction, ..
        } => {
            validate_user_id(user_id)?;
            if reaction.is_empty() || reaction.chars().count() > MAX_REACTION_LENGTH {
                return Err(ValidationError::InvalidChat(format!(
                    "Reaction must be 1-{MAX_REACTION_LENGTH} characters"
                )));
            }
        },
        ClientMessage::Leave { user_id, .. }
        | ClientMessage::ToggleMute { user_id, .. }
        | ClientMessage::RaiseHand { user_id, .. }
        | ClientMessage::ToggleVideo { user_id, .. }
        | ClientMessage::ShareScreen { user_id, .. } => {
            validate_user_id(user_id)?;
        },
        ClientMessage::WebrtcOffer { target_user_id, .. }
        | ClientMessage::WebrtcAnswer { target_user_id, .. }
        | ClientMessage::WebrtcIceCandidate { target_user_id, .. } => {
            validate_user_id(target_user_id)?;
        },
        ClientMessage::HostMuteParticipant {
            acting_user_id,
            target_user_id,
            ..
        }
        | ClientMessage::HostKickParticipant {
            acting_user_id,
            target_user_id,
            ..
        } => {
            validate_user_id(acting_user_id)?;
            validate_user_id(target_user_id)?;
        },
        ClientMessage::HostLockRoom { acting_user_id, .. }
        | ClientMessage::HostSetMediaPermissions { acting_user_id, .. }
        | ClientMessage::StartRecording { acting_user_id, .. }
        | ClientMessage::StopRecording { acting_user_id, .. }
        | ClientMessage::UpdatePermissions { acting_user_id, .. } => {
            validate_user_id(acting_user_id)?;
        },
        ClientMessage::EndRoom { .. } => {},
    }

    Ok(())
}
