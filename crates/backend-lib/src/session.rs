// ============================
// crates/backend-lib/src/session.rs
// ============================
//! One active session per identity.
//!
//! Best effort rather than a lock: a session is marked inactive only once the
//! leave or disconnect of its connection has been processed.
use crate::error::AppError;
use crate::metrics::SESSION_REJECTED;
use crate::registry::ConnectionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use roomsync_common::RoomId;

/// Key a user is tracked under: the e-mail when one is given, else the user id
pub fn session_identity(user_id: &str, user_email: Option<&str>) -> String {
    match user_email.map(str::trim) {
        Some(email) if !email.is_empty() => email.to_lowercase(),
        _ => user_id.to_string(),
    }
}

/// Session record, keyed by identity
#[derive(Debug, Clone)]
pub struct UserSession {
    pub connection_id: ConnectionId,
    pub room_id: RoomId,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

/// Tracks the live session of every identity across reconnects and devices
#[derive(Default)]
pub struct SessionGuard {
    sessions: DashMap<String, UserSession>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the identity for `connection_id` in `room_id`.
    ///
    /// Another active connection in the same room is a duplicate session (a
    /// second tab); an active session anywhere else is another device.
    pub fn try_acquire(
        &self,
        identity: &str,
        connection_id: ConnectionId,
        room_id: &str,
    ) -> Result<(), AppError> {
        let mut entry = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| UserSession {
                connection_id,
                room_id: room_id.to_string(),
                active: false,
                joined_at: Utc::now(),
            });

        let session = entry.value_mut();
        if session.active && session.connection_id != connection_id {
            counter!(SESSION_REJECTED).increment(1);
            return Err(if session.room_id == room_id {
                AppError::DuplicateSession
            } else {
                AppError::ActiveElsewhere
            });
        }

        *session = UserSession {
            connection_id,
            room_id: room_id.to_string(),
            active: true,
            joined_at: Utc::now(),
        };
        Ok(())
    }

    /// Mark the session inactive, keeping the record. Only the connection
    /// that holds the session may release it, so a rejected second connection
    /// cannot end the first one's session.
    pub fn release_for(&self, identity: &str, connection_id: &ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(identity) {
            if session.connection_id == *connection_id {
                session.active = false;
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<UserSession> {
        self.sessions.get(identity).map(|s| s.clone())
    }

    pub fn is_active(&self, identity: &str) -> bool {
        self.sessions.get(identity).is_some_and(|s| s.active)
    }
}
