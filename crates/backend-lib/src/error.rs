// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use roomsync_common::{ErrorKind, ServerMessage};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Connection has not joined room {0}")]
    NotJoined(String),

    #[error("Only the host can perform this action")]
    NotHost,

    #[error("Chat is not allowed in this room")]
    ChatDisabled,

    #[error("Media sharing is not allowed in this room")]
    MediaDisabled,

    #[error("Chat is locked by the host; only public messages are allowed")]
    ChatLocked,

    #[error("You can only change your own state")]
    NotSelf,

    #[error("You are already in this meeting from another tab or connection")]
    DuplicateSession,

    #[error("You are already in a meeting session from another device")]
    ActiveElsewhere,

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Room already exists: {0}")]
    RoomExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Denial category presented to clients
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RoomNotFound(_)
            | AppError::ParticipantNotFound(_)
            | AppError::NotJoined(_) => ErrorKind::NotFound,
            AppError::NotHost
            | AppError::ChatDisabled
            | AppError::MediaDisabled
            | AppError::ChatLocked
            | AppError::NotSelf => ErrorKind::Forbidden,
            AppError::DuplicateSession | AppError::ActiveElsewhere => ErrorKind::DuplicateSession,
            AppError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            AppError::RoomExists(_) | AppError::InvalidInput(_) | AppError::Json(_) => {
                ErrorKind::Invalid
            },
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RoomExists(_) => StatusCode::CONFLICT,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::DuplicateSession => StatusCode::CONFLICT,
                ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ErrorKind::Invalid => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::RoomNotFound(_) => "ROOM_001",
            AppError::ParticipantNotFound(_) => "ROOM_002",
            AppError::NotJoined(_) => "ROOM_003",
            AppError::RoomExists(_) => "ROOM_004",
            AppError::NotHost => "AUTHZ_001",
            AppError::NotSelf => "AUTHZ_002",
            AppError::ChatDisabled => "CHAT_001",
            AppError::ChatLocked => "CHAT_002",
            AppError::MediaDisabled => "CHAT_003",
            AppError::PayloadTooLarge { .. } => "CHAT_004",
            AppError::DuplicateSession => "SESSION_001",
            AppError::ActiveElsewhere => "SESSION_002",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Json(_) => "JSON_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Targeted `action-error` for the requesting connection
    pub fn to_action_error(&self) -> ServerMessage {
        let message = match self {
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            _ => self.to_string(),
        };
        ServerMessage::ActionError {
            kind: self.kind(),
            code: self.error_code().to_string(),
            message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}
