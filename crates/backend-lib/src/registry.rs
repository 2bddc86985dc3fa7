// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Room & participant registry.
//!
//! The registry is the only mutable shared state of the server. Each room lives
//! behind its own mutex; every component mutates a room and enqueues the
//! resulting broadcasts while holding that mutex, so all connections observe a
//! room's events in the order they were applied.
//!
//! Lock order: a room mutex may be held while touching the dashmaps, never the
//! other way round. Dashmap guards are always dropped before a room is locked.

use crate::error::AppError;
use crate::metrics::{ROOM_ACTIVE, ROOM_CLOSED, ROOM_CREATED};
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use roomsync_common::{
    ChatMessage, ParticipantInfo, Room, RoomId, RoomSettings, RoomSummary, ServerMessage, UserId,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Live transport handle
pub type ConnectionId = Uuid;

/// Outbound queue of one connection; FIFO per connection
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Room metadata supplied by the directory layer
#[derive(Debug, Clone, Deserialize)]
pub struct NewRoom {
    #[serde(default)]
    pub id: Option<RoomId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub host_id: UserId,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default = "default_true")]
    pub allow_chat: bool,
    #[serde(default)]
    pub allow_media: bool,
}

fn default_true() -> bool {
    true
}

impl NewRoom {
    pub fn new(title: impl Into<String>, host_id: impl Into<UserId>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            host_id: host_id.into(),
            host_name: None,
            allow_chat: true,
            allow_media: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<RoomId>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn into_room(self, id: RoomId) -> Room {
        let now = Utc::now();
        Room {
            id,
            title: self.title,
            description: self.description,
            host_id: self.host_id,
            host_name: self.host_name,
            allow_chat: self.allow_chat,
            allow_media: self.allow_media,
            allow_screen_share: false,
            muted_by_default: false,
            locked: false,
            is_recording: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user's presence in one room, bound to its live connection
#[derive(Debug, Clone)]
pub struct Participant {
    pub info: ParticipantInfo,
    /// Most recently joined connection for this user in this room
    pub connection_id: ConnectionId,
}

impl Participant {
    pub fn new(
        user_id: impl Into<UserId>,
        user_name: impl Into<String>,
        user_email: Option<String>,
        claimed_host: bool,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            info: ParticipantInfo {
                user_id: user_id.into(),
                user_name: user_name.into(),
                user_email,
                is_host: claimed_host,
                is_muted: false,
                has_video: false,
                is_screen_sharing: false,
                is_hand_raised: false,
                joined_at: Utc::now(),
            },
            connection_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.info.user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub created: bool,
    /// Connection the participant was bound to before this call, if it changed
    pub replaced_connection: Option<ConnectionId>,
}

#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub removed: Option<Participant>,
    pub remaining_count: usize,
}

impl RemoveOutcome {
    pub fn removed(&self) -> bool {
        self.removed.is_some()
    }
}

/// What a connection is currently joined as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Key used by the session guard
    pub identity: String,
}

struct ConnectionSlot {
    tx: Outbound,
    binding: Option<Binding>,
}

/// State purged when a room is destroyed
#[derive(Debug)]
pub struct ClosedRoom {
    pub room_id: RoomId,
    pub record: Option<Room>,
    pub participants: Vec<Participant>,
    pub members: Vec<ConnectionId>,
}

/// One room: optional directory record, participants, chat history and the
/// connections attached to its broadcast group
#[derive(Debug)]
pub struct RoomEntry {
    id: RoomId,
    record: Option<Room>,
    participants: Vec<Participant>,
    chat: Vec<ChatMessage>,
    members: HashMap<ConnectionId, Outbound>,
    eviction_seq: u64,
    pending_eviction: Option<u64>,
    closed: bool,
}

impl RoomEntry {
    fn new(id: RoomId, record: Option<Room>) -> Self {
        Self {
            id,
            record,
            participants: Vec::new(),
            chat: Vec::new(),
            members: HashMap::new(),
            eviction_seq: 0,
            pending_eviction: None,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self) -> Option<&Room> {
        self.record.as_ref()
    }

    /// Recorded host, the only authority for privileged actions
    pub fn host_id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.host_id.as_str())
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id() == Some(user_id)
    }

    pub fn settings(&self) -> RoomSettings {
        self.record.as_ref().map(Room::settings).unwrap_or_default()
    }

    /// Insert a participant unless `(room, user)` is already present.
    ///
    /// An existing entry keeps its state; only its connection binding moves to
    /// the newer connection.
    pub fn add_participant(&mut self, participant: Participant) -> AddOutcome {
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.info.user_id == participant.info.user_id)
        {
            let replaced = (existing.connection_id != participant.connection_id)
                .then_some(existing.connection_id);
            existing.connection_id = participant.connection_id;
            return AddOutcome {
                created: false,
                replaced_connection: replaced,
            };
        }

        self.participants.push(participant);
        AddOutcome {
            created: true,
            replaced_connection: None,
        }
    }

    pub fn remove_participant(&mut self, user_id: &str) -> RemoveOutcome {
        let removed = self
            .participants
            .iter()
            .position(|p| p.info.user_id == user_id)
            .map(|idx| self.participants.remove(idx));
        RemoveOutcome {
            removed,
            remaining_count: self.participants.len(),
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.info.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.info.user_id == user_id)
    }

    /// Participants in join order
    pub fn list_participants(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| p.info.clone()).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn append_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
    }

    /// History in insertion order
    pub fn chat_history(&self) -> &[ChatMessage] {
        &self.chat
    }

    /// History as `user_id` may see it: public messages plus targeted ones
    /// they sent or received
    pub fn chat_history_for(&self, user_id: &str) -> Vec<ChatMessage> {
        self.chat
            .iter()
            .filter(|m| m.is_visible_to(user_id))
            .cloned()
            .collect()
    }

    pub fn add_member(&mut self, connection_id: ConnectionId, tx: Outbound) {
        self.members.insert(connection_id, tx);
    }

    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Outbound> {
        self.members.remove(connection_id)
    }

    /// Deliver to every connection in the room's broadcast group
    pub fn broadcast(&self, msg: &ServerMessage) {
        for tx in self.members.values() {
            // a closed queue means the connection is going away; its disconnect cleans up
            let _ = tx.send(msg.clone());
        }
    }

    /// Deliver to one attached connection; false if it is not attached
    pub fn send_to(&self, connection_id: &ConnectionId, msg: ServerMessage) -> bool {
        self.members
            .get(connection_id)
            .is_some_and(|tx| tx.send(msg).is_ok())
    }

    /// Deliver to the connection currently bound to `user_id`
    pub fn send_to_user(&self, user_id: &str, msg: ServerMessage) -> bool {
        match self.participant(user_id) {
            Some(p) => self.send_to(&p.connection_id, msg),
            None => false,
        }
    }

    pub fn broadcast_participants(&self) {
        self.broadcast(&ServerMessage::ParticipantsUpdated {
            participants: self.list_participants(),
        });
    }

    pub fn broadcast_settings(&self) {
        self.broadcast(&ServerMessage::RoomSettingsUpdated {
            room_id: self.id.clone(),
            settings: self.settings(),
        });
    }

    /// Arm a new eviction check, superseding any earlier one
    pub fn arm_eviction(&mut self) -> u64 {
        self.eviction_seq += 1;
        self.pending_eviction = Some(self.eviction_seq);
        self.eviction_seq
    }

    fn touch(&mut self) {
        if let Some(record) = self.record.as_mut() {
            record.updated_at = Utc::now();
        }
    }
}

/// Registry of rooms and live connections
pub struct Registry {
    rooms: DashMap<RoomId, Arc<Mutex<RoomEntry>>>,
    connections: DashMap<ConnectionId, ConnectionSlot>,
    allow_adhoc_rooms: bool,
}

impl Registry {
    pub fn new(allow_adhoc_rooms: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            allow_adhoc_rooms,
        }
    }

    // ---- rooms ----

    /// Register a room record. A room opened ad hoc by an earlier join adopts the record.
    pub fn create_room(&self, meta: NewRoom) -> Result<Room, AppError> {
        let id = meta
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let room = self.lock_or_open(&id, true, |entry| {
            if entry.record.is_some() {
                return Err(AppError::RoomExists(id.clone()));
            }
            let room = meta.into_room(id.clone());
            entry.record = Some(room.clone());
            Ok(room)
        })?;

        counter!(ROOM_CREATED).increment(1);
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        info!(room_id = %room.id, host_id = %room.host_id, "room created");
        Ok(room)
    }

    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.with_room(room_id, |entry| Ok(entry.record.clone()))
            .ok()
            .flatten()
    }

    /// Every open room that has a record, with live participant counts
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let entries: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms: Vec<RoomSummary> = entries
            .iter()
            .filter_map(|entry| {
                let entry = entry.lock();
                if entry.closed {
                    return None;
                }
                entry.record.clone().map(|room| RoomSummary {
                    room,
                    participant_count: entry.participant_count(),
                })
            })
            .collect();
        rooms.sort_by(|a, b| a.room.created_at.cmp(&b.room.created_at));
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Destroy a room: participants, chat and membership go in one step and every
    /// attached connection is told the room closed
    pub fn delete_room(&self, room_id: &str) -> Option<ClosedRoom> {
        let entry = self.entry(room_id)?;
        let mut entry = entry.lock();
        if entry.closed {
            return None;
        }
        Some(self.close_locked(&mut entry))
    }

    /// Delete the room only if eviction `token` is still the armed one and nobody is in it
    pub fn evict_if_idle(&self, room_id: &str, token: u64) -> Option<ClosedRoom> {
        let entry = self.entry(room_id)?;
        let mut entry = entry.lock();
        if entry.closed
            || entry.participant_count() > 0
            || entry.pending_eviction != Some(token)
        {
            return None;
        }
        Some(self.close_locked(&mut entry))
    }

    fn close_locked(&self, entry: &mut RoomEntry) -> ClosedRoom {
        entry.broadcast(&ServerMessage::RoomClosed {
            room_id: entry.id.clone(),
        });
        entry.closed = true;
        entry.chat.clear();
        let members: Vec<ConnectionId> = entry.members.drain().map(|(id, _)| id).collect();
        let closed = ClosedRoom {
            room_id: entry.id.clone(),
            record: entry.record.take(),
            participants: std::mem::take(&mut entry.participants),
            members,
        };
        self.rooms.remove(&entry.id);

        counter!(ROOM_CLOSED).increment(1);
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        info!(room_id = %closed.room_id, "room closed");
        closed
    }

    fn entry(&self, room_id: &str) -> Option<Arc<Mutex<RoomEntry>>> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    /// Run `f` against a live room; a room deleted meanwhile reads as absent
    pub fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut RoomEntry) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let entry = self
            .entry(room_id)
            .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))?;
        let mut entry = entry.lock();
        if entry.closed {
            return Err(AppError::RoomNotFound(room_id.to_string()));
        }
        f(&mut entry)
    }

    /// Like `with_room`, but opens an unrecorded room when ad-hoc rooms are allowed
    pub fn with_room_for_join<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut RoomEntry) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.lock_or_open(room_id, self.allow_adhoc_rooms, f)
    }

    fn lock_or_open<T>(
        &self,
        room_id: &str,
        create: bool,
        f: impl FnOnce(&mut RoomEntry) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        loop {
            let entry = if create {
                self.rooms
                    .entry(room_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(RoomEntry::new(room_id.to_string(), None)))
                    })
                    .value()
                    .clone()
            } else {
                self.entry(room_id)
                    .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))?
            };

            let mut guard = entry.lock();
            if guard.closed {
                // lost a race with deletion; the closed entry is already out of the map
                continue;
            }
            return f(&mut guard);
        }
    }

    // ---- participants & chat ----

    pub fn add_participant(
        &self,
        room_id: &str,
        participant: Participant,
    ) -> Result<AddOutcome, AppError> {
        self.with_room(room_id, |entry| Ok(entry.add_participant(participant)))
    }

    pub fn remove_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<RemoveOutcome, AppError> {
        self.with_room(room_id, |entry| Ok(entry.remove_participant(user_id)))
    }

    pub fn list_participants(&self, room_id: &str) -> Result<Vec<ParticipantInfo>, AppError> {
        self.with_room(room_id, |entry| Ok(entry.list_participants()))
    }

    pub fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), AppError> {
        self.with_room(room_id, |entry| {
            entry.append_chat(message);
            Ok(())
        })
    }

    pub fn chat_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        self.with_room(room_id, |entry| Ok(entry.chat_history().to_vec()))
    }

    /// Apply a settings mutation to the record and bump `updated_at`
    pub fn update_record(
        entry: &mut RoomEntry,
        f: impl FnOnce(&mut Room),
    ) -> Result<RoomSettings, AppError> {
        let room_id = entry.id.clone();
        let record = entry
            .record
            .as_mut()
            .ok_or(AppError::RoomNotFound(room_id))?;
        f(record);
        entry.touch();
        Ok(entry.settings())
    }

    // ---- connections ----

    pub fn register_connection(&self, connection_id: ConnectionId, tx: Outbound) {
        self.connections.insert(
            connection_id,
            ConnectionSlot { tx, binding: None },
        );
    }

    /// Forget a connection, returning what it was joined as
    pub fn unregister_connection(&self, connection_id: &ConnectionId) -> Option<Binding> {
        self.connections
            .remove(connection_id)
            .and_then(|(_, slot)| slot.binding)
    }

    pub fn outbound(&self, connection_id: &ConnectionId) -> Option<Outbound> {
        self.connections.get(connection_id).map(|s| s.tx.clone())
    }

    /// Send directly to a connection regardless of room membership
    pub fn send_to_connection(&self, connection_id: &ConnectionId, msg: ServerMessage) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|s| s.tx.send(msg).is_ok())
    }

    pub fn binding(&self, connection_id: &ConnectionId) -> Option<Binding> {
        self.connections
            .get(connection_id)
            .and_then(|s| s.binding.clone())
    }

    pub fn bind(&self, connection_id: &ConnectionId, binding: Binding) {
        if let Some(mut slot) = self.connections.get_mut(connection_id) {
            slot.binding = Some(binding);
        }
    }

    /// Clear the binding if it still points at `room_id`
    pub fn unbind(&self, connection_id: &ConnectionId, room_id: &str) -> Option<Binding> {
        let mut slot = self.connections.get_mut(connection_id)?;
        if slot.binding.as_ref().is_some_and(|b| b.room_id == room_id) {
            slot.binding.take()
        } else {
            None
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(user: &str, conn: ConnectionId) -> Participant {
        Participant::new(user, user.to_uppercase(), None, false, conn)
    }

    fn registry_with_room() -> Registry {
        let registry = Registry::new(true);
        registry
            .create_room(NewRoom::new("Standup", "host").with_id("r1"))
            .unwrap();
        registry
    }

    #[test]
    fn test_create_and_get_room() {
        let registry = registry_with_room();
        let room = registry.get_room("r1").unwrap();
        assert_eq!(room.host_id, "host");
        assert!(room.allow_chat);
        assert!(!room.locked);
        assert!(registry.get_room("nope").is_none());
    }

    #[test]
    fn test_create_duplicate_room_fails() {
        let registry = registry_with_room();
        let err = registry
            .create_room(NewRoom::new("Again", "someone").with_id("r1"))
            .unwrap_err();
        assert!(matches!(err, AppError::RoomExists(_)));
        assert_eq!(registry.get_room("r1").unwrap().host_id, "host");
    }

    #[test]
    fn test_add_participant_is_idempotent() {
        let registry = registry_with_room();
        let conn = Uuid::new_v4();

        let first = registry.add_participant("r1", participant("alice", conn)).unwrap();
        assert!(first.created);

        let mut again = participant("alice", conn);
        again.info.is_muted = true;
        let second = registry.add_participant("r1", again).unwrap();
        assert!(!second.created);
        assert_eq!(second.replaced_connection, None);

        let list = registry.list_participants("r1").unwrap();
        assert_eq!(list.len(), 1);
        // existing entry left untouched
        assert!(!list[0].is_muted);
    }

    #[test]
    fn test_rejoin_moves_connection_binding() {
        let registry = registry_with_room();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        registry.add_participant("r1", participant("alice", old)).unwrap();
        let outcome = registry.add_participant("r1", participant("alice", new)).unwrap();
        assert_eq!(outcome.replaced_connection, Some(old));

        registry
            .with_room("r1", |entry| {
                assert_eq!(entry.participant("alice").unwrap().connection_id, new);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_remove_participant_reports_remaining() {
        let registry = registry_with_room();
        registry.add_participant("r1", participant("a", Uuid::new_v4())).unwrap();
        registry.add_participant("r1", participant("b", Uuid::new_v4())).unwrap();

        let outcome = registry.remove_participant("r1", "a").unwrap();
        assert!(outcome.removed());
        assert_eq!(outcome.remaining_count, 1);

        let outcome = registry.remove_participant("r1", "a").unwrap();
        assert!(!outcome.removed());
        assert_eq!(outcome.remaining_count, 1);
    }

    #[test]
    fn test_participants_keep_join_order() {
        let registry = registry_with_room();
        for user in ["c", "a", "b"] {
            registry.add_participant("r1", participant(user, Uuid::new_v4())).unwrap();
        }
        let ids: Vec<_> = registry
            .list_participants("r1")
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_delete_room_purges_everything() {
        let registry = registry_with_room();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        registry
            .with_room("r1", |entry| {
                entry.add_member(conn, tx);
                entry.add_participant(participant("alice", conn));
                Ok(())
            })
            .unwrap();

        let closed = registry.delete_room("r1").unwrap();
        assert_eq!(closed.participants.len(), 1);
        assert_eq!(closed.members, vec![conn]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::RoomClosed { room_id } if room_id == "r1"
        ));

        // stale lookups fail gracefully
        assert!(registry.get_room("r1").is_none());
        assert!(matches!(
            registry.list_participants("r1"),
            Err(AppError::RoomNotFound(_))
        ));
        assert!(registry.chat_history("r1").is_err());
        assert!(registry.delete_room("r1").is_none());
    }

    #[test]
    fn test_evict_if_idle_checks_token_and_count() {
        let registry = registry_with_room();
        let first = registry.with_room("r1", |e| Ok(e.arm_eviction())).unwrap();
        let second = registry.with_room("r1", |e| Ok(e.arm_eviction())).unwrap();

        // superseded token is a no-op
        assert!(registry.evict_if_idle("r1", first).is_none());

        registry.add_participant("r1", participant("a", Uuid::new_v4())).unwrap();
        assert!(registry.evict_if_idle("r1", second).is_none());

        registry.remove_participant("r1", "a").unwrap();
        assert!(registry.evict_if_idle("r1", second).is_some());
        assert!(registry.evict_if_idle("r1", second).is_none());
    }

    #[test]
    fn test_adhoc_room_adopts_record() {
        let registry = Registry::new(true);
        registry
            .with_room_for_join("course-1", |entry| {
                entry.add_participant(participant("a", Uuid::new_v4()));
                Ok(())
            })
            .unwrap();
        assert!(registry.get_room("course-1").is_none());
        assert!(registry.list_rooms().is_empty());

        registry
            .create_room(NewRoom::new("Course", "host").with_id("course-1"))
            .unwrap();
        let rooms = registry.list_rooms();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].participant_count, 1);
    }

    #[test]
    fn test_join_without_adhoc_requires_record() {
        let registry = Registry::new(false);
        let result = registry.with_room_for_join("ghost", |_| Ok(()));
        assert!(matches!(result, Err(AppError::RoomNotFound(_))));
    }

    #[test]
    fn test_connection_bindings() {
        let registry = Registry::new(true);
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_connection(conn, tx);

        let binding = Binding {
            room_id: "r1".to_string(),
            user_id: "alice".to_string(),
            identity: "alice@example.com".to_string(),
        };
        registry.bind(&conn, binding.clone());
        assert_eq!(registry.binding(&conn), Some(binding.clone()));

        assert!(registry.unbind(&conn, "other").is_none());
        assert_eq!(registry.unbind(&conn, "r1"), Some(binding));
        assert!(registry.binding(&conn).is_none());
        assert!(registry.unregister_connection(&conn).is_none());
        assert_eq!(registry.connection_count(), 0);
    }
}
