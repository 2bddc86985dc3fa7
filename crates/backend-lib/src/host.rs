// ============================
// crates/backend-lib/src/host.rs
// ============================
//! Host authority controller.
//!
//! Every privileged action re-reads the room's recorded `host_id` and compares
//! it with the acting user. The join-time host claim of a participant is never
//! consulted. A denied action changes nothing and broadcasts nothing.
use crate::error::AppError;
use crate::metrics::{HOST_ACTION, HOST_DENIED};
use crate::presence::EvictionScheduler;
use crate::registry::{ClosedRoom, ConnectionId, Registry, RoomEntry};
use crate::session::SessionGuard;
use metrics::counter;
use roomsync_common::{PermissionUpdate, Room, ServerMessage};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a kick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickOutcome {
    /// Connection that was told it was removed
    pub connection_id: ConnectionId,
    pub remaining_count: usize,
}

/// Fail unless `acting_user_id` is the room's recorded host. An ad-hoc room
/// has no record and therefore no host.
pub fn ensure_host(entry: &RoomEntry, acting_user_id: &str) -> Result<(), AppError> {
    if entry.is_host(acting_user_id) {
        Ok(())
    } else {
        Err(AppError::NotHost)
    }
}

pub struct HostAuthority {
    registry: Arc<Registry>,
    sessions: Arc<SessionGuard>,
    scheduler: Arc<EvictionScheduler>,
}

impl HostAuthority {
    pub fn new(
        registry: Arc<Registry>,
        sessions: Arc<SessionGuard>,
        scheduler: Arc<EvictionScheduler>,
    ) -> Self {
        Self {
            registry,
            sessions,
            scheduler,
        }
    }

    /// Run `f` under the room lock once the acting user is verified as host
    fn privileged<T>(
        &self,
        action: &'static str,
        room_id: &str,
        acting_user_id: &str,
        f: impl FnOnce(&mut RoomEntry) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let result = self.registry.with_room(room_id, |entry| {
            ensure_host(entry, acting_user_id)?;
            f(entry)
        });

        match &result {
            Ok(_) => {
                counter!(HOST_ACTION).increment(1);
                info!(room_id, acting_user_id, action, "host action applied");
            },
            Err(e) => {
                counter!(HOST_DENIED).increment(1);
                warn!(room_id, acting_user_id, action, error = %e, "host action denied");
            },
        }
        result
    }

    pub fn set_mute(
        &self,
        room_id: &str,
        acting_user_id: &str,
        target_user_id: &str,
        muted: bool,
    ) -> Result<(), AppError> {
        self.privileged("mute", room_id, acting_user_id, |entry| {
            let participant = entry
                .participant_mut(target_user_id)
                .ok_or_else(|| AppError::ParticipantNotFound(target_user_id.to_string()))?;
            participant.info.is_muted = muted;

            let action = if muted { "muted" } else { "unmuted" };
            entry.send_to_user(
                target_user_id,
                ServerMessage::HostAction {
                    action: action.to_string(),
                    message: format!("You have been {action} by the host"),
                },
            );
            entry.broadcast(&ServerMessage::ParticipantMuted {
                user_id: target_user_id.to_string(),
                is_muted: muted,
            });
            entry.broadcast_participants();
            Ok(())
        })
    }

    /// Remove a participant. The removed connection hears about it first and is
    /// detached before the rest of the room sees the new list.
    pub fn kick(
        &self,
        room_id: &str,
        acting_user_id: &str,
        target_user_id: &str,
    ) -> Result<KickOutcome, AppError> {
        let (outcome, eviction) = self.privileged("kick", room_id, acting_user_id, |entry| {
            if acting_user_id == target_user_id {
                return Err(AppError::InvalidInput(
                    "The host cannot kick themselves; end the room instead".to_string(),
                ));
            }
            let removal = entry.remove_participant(target_user_id);
            let removed = removal
                .removed
                .ok_or_else(|| AppError::ParticipantNotFound(target_user_id.to_string()))?;

            entry.send_to(
                &removed.connection_id,
                ServerMessage::KickedFromRoom {
                    room_id: room_id.to_string(),
                    message: "You have been removed from the room by the host".to_string(),
                },
            );
            entry.remove_member(&removed.connection_id);

            entry.broadcast(&ServerMessage::ParticipantLeft {
                user_id: target_user_id.to_string(),
            });
            entry.broadcast_participants();

            let eviction = (removal.remaining_count == 0).then(|| entry.arm_eviction());
            Ok((
                KickOutcome {
                    connection_id: removed.connection_id,
                    remaining_count: removal.remaining_count,
                },
                eviction,
            ))
        })?;

        if let Some(binding) = self.registry.unbind(&outcome.connection_id, room_id) {
            self.sessions
                .release_for(&binding.identity, &outcome.connection_id);
        }
        if let Some(token) = eviction {
            self.scheduler.schedule(room_id, token);
        }
        Ok(outcome)
    }

    /// Lock or unlock chat. Locked rooms stay joinable; non-host senders are
    /// limited to public messages.
    pub fn set_locked(
        &self,
        room_id: &str,
        acting_user_id: &str,
        locked: bool,
    ) -> Result<(), AppError> {
        self.privileged("lock", room_id, acting_user_id, |entry| {
            Registry::update_record(entry, |room| room.locked = locked)?;
            entry.broadcast_settings();
            Ok(())
        })
    }

    pub fn set_media_permission(
        &self,
        room_id: &str,
        acting_user_id: &str,
        allowed: bool,
    ) -> Result<(), AppError> {
        self.privileged("media-permission", room_id, acting_user_id, |entry| {
            Registry::update_record(entry, |room| room.allow_media = allowed)?;
            entry.broadcast_settings();
            Ok(())
        })
    }

    pub fn set_recording(
        &self,
        room_id: &str,
        acting_user_id: &str,
        active: bool,
    ) -> Result<(), AppError> {
        self.privileged("recording", room_id, acting_user_id, |entry| {
            Registry::update_record(entry, |room| room.is_recording = active)?;
            let room_id = room_id.to_string();
            entry.broadcast(&if active {
                ServerMessage::RecordingStarted { room_id }
            } else {
                ServerMessage::RecordingStopped { room_id }
            });
            Ok(())
        })
    }

    /// Apply a partial settings change and broadcast the resulting settings
    pub fn set_participant_permissions(
        &self,
        room_id: &str,
        acting_user_id: &str,
        update: PermissionUpdate,
    ) -> Result<Room, AppError> {
        self.privileged("permissions", room_id, acting_user_id, |entry| {
            if update.is_empty() {
                return Err(AppError::InvalidInput("No settings to update".to_string()));
            }
            Registry::update_record(entry, |room| {
                if let Some(v) = update.allow_chat {
                    room.allow_chat = v;
                }
                if let Some(v) = update.allow_media {
                    room.allow_media = v;
                }
                if let Some(v) = update.allow_screen_share {
                    room.allow_screen_share = v;
                }
                if let Some(v) = update.muted_by_default {
                    room.muted_by_default = v;
                }
            })?;
            entry.broadcast_settings();
            entry
                .record()
                .cloned()
                .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))
        })
    }

    /// End the room for everyone immediately
    pub fn end_room(&self, room_id: &str, acting_user_id: &str) -> Result<ClosedRoom, AppError> {
        self.privileged("end-room", room_id, acting_user_id, |_| Ok(()))?;
        self.scheduler
            .close_now(room_id)
            .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))
    }
}
