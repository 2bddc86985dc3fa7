// ============================
// crates/backend-lib/src/presence.rs
// ============================
//! Presence and eviction.
//!
//! A `(room, user)` binding moves `Absent -> Joined -> Absent`. Explicit leave
//! and transport disconnect are the same transition. A room that drops to zero
//! participants is deleted after a grace window unless somebody returns; the
//! condition is re-checked when the timer fires instead of cancelling timers.
use crate::error::AppError;
use crate::metrics::{PARTICIPANT_JOINED, PARTICIPANT_LEFT, ROOM_EVICTED};
use crate::registry::{Binding, ClosedRoom, ConnectionId, Participant, Registry};
use crate::session::{session_identity, SessionGuard};
use metrics::counter;
use roomsync_common::{DirectoryEvent, ParticipantInfo, RoomId, ServerMessage, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Deferred, condition-checked room deletion
pub struct EvictionScheduler {
    registry: Arc<Registry>,
    sessions: Arc<SessionGuard>,
    grace: Duration,
    directory: broadcast::Sender<DirectoryEvent>,
}

impl EvictionScheduler {
    pub fn new(
        registry: Arc<Registry>,
        sessions: Arc<SessionGuard>,
        grace: Duration,
        directory: broadcast::Sender<DirectoryEvent>,
    ) -> Self {
        Self {
            registry,
            sessions,
            grace,
            directory,
        }
    }

    /// Check the room again once the grace window has passed. `token` comes from
    /// `RoomEntry::arm_eviction`; a later arm supersedes it.
    pub fn schedule(self: &Arc<Self>, room_id: &str, token: u64) {
        let this = Arc::clone(self);
        let room_id = room_id.to_string();
        debug!(%room_id, token, grace_ms = this.grace.as_millis() as u64, "eviction scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(this.grace).await;
            match this.registry.evict_if_idle(&room_id, token) {
                Some(closed) => {
                    counter!(ROOM_EVICTED).increment(1);
                    info!(%room_id, "empty room evicted");
                    this.finish(&closed);
                },
                None => debug!(%room_id, token, "eviction skipped, room in use or superseded"),
            }
        });
    }

    /// Delete the room right away, e.g. when the host ends it
    pub fn close_now(&self, room_id: &str) -> Option<ClosedRoom> {
        let closed = self.registry.delete_room(room_id)?;
        self.finish(&closed);
        Some(closed)
    }

    fn finish(&self, closed: &ClosedRoom) {
        for participant in &closed.participants {
            let identity = session_identity(
                participant.user_id(),
                participant.info.user_email.as_deref(),
            );
            self.sessions
                .release_for(&identity, &participant.connection_id);
        }
        for connection_id in &closed.members {
            self.registry.unbind(connection_id, &closed.room_id);
        }
        // nobody watching the directory is fine
        let _ = self.directory.send(DirectoryEvent::RoomClosed {
            room_id: closed.room_id.clone(),
        });
    }
}

/// A join as asserted by the client
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub user_email: Option<String>,
    /// Informational; privileged actions check the room's recorded host
    pub claimed_host: bool,
}

impl JoinRequest {
    pub fn new(
        room_id: impl Into<RoomId>,
        user_id: impl Into<UserId>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_email: None,
            claimed_host: false,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    fn identity(&self) -> String {
        session_identity(&self.user_id, self.user_email.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False when the user was already present (refresh, repeated join)
    pub created: bool,
    pub participant_count: usize,
}

pub struct Presence {
    registry: Arc<Registry>,
    sessions: Arc<SessionGuard>,
    scheduler: Arc<EvictionScheduler>,
}

impl Presence {
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

    /// Join `connection_id` to a room.
    ///
    /// A first join announces the participant to the room; any join, fresh or
    /// repeated, sends the joiner the participant list, the chat history they
    /// may see and the room settings, all under the room lock so no chat can
    /// interleave.
    pub fn join(
        &self,
        connection_id: ConnectionId,
        request: JoinRequest,
    ) -> Result<JoinOutcome, AppError> {
        let tx = self.registry.outbound(&connection_id).ok_or_else(|| {
            AppError::Internal(format!("connection {connection_id} is not registered"))
        })?;

        // one room per connection: joining elsewhere leaves the previous room
        if let Some(previous) = self.registry.binding(&connection_id) {
            if previous.room_id != request.room_id || previous.user_id != request.user_id {
                self.depart(connection_id, previous);
            }
        }

        let identity = request.identity();
        self.sessions
            .try_acquire(&identity, connection_id, &request.room_id)?;

        let result = self.registry.with_room_for_join(&request.room_id, |entry| {
            let mut participant = Participant::new(
                request.user_id.clone(),
                request.user_name.clone(),
                request.user_email.clone(),
                request.claimed_host,
                connection_id,
            );
            participant.info.is_muted = entry.settings().muted_by_default;
            let announced = participant.info.clone();

            entry.add_member(connection_id, tx);
            let added = entry.add_participant(participant);
            if let Some(stale) = added.replaced_connection {
                entry.remove_member(&stale);
            }

            if added.created {
                entry.broadcast(&ServerMessage::ParticipantJoined {
                    participant: announced,
                });
                entry.broadcast_participants();
            } else {
                entry.send_to(
                    &connection_id,
                    ServerMessage::ParticipantsUpdated {
                        participants: entry.list_participants(),
                    },
                );
            }
            entry.send_to(
                &connection_id,
                ServerMessage::ChatHistory {
                    messages: entry.chat_history_for(&request.user_id),
                },
            );
            entry.send_to(
                &connection_id,
                ServerMessage::RoomSettingsUpdated {
                    room_id: request.room_id.clone(),
                    settings: entry.settings(),
                },
            );

            Ok((
                JoinOutcome {
                    created: added.created,
                    participant_count: entry.participant_count(),
                },
                added.replaced_connection,
            ))
        });

        let (outcome, stale) = match result {
            Ok(v) => v,
            Err(e) => {
                self.sessions.release_for(&identity, &connection_id);
                return Err(e);
            },
        };

        if let Some(stale) = stale {
            self.registry.unbind(&stale, &request.room_id);
        }
        self.registry.bind(
            &connection_id,
            Binding {
                room_id: request.room_id.clone(),
                user_id: request.user_id.clone(),
                identity,
            },
        );

        if outcome.created {
            counter!(PARTICIPANT_JOINED).increment(1);
        }
        info!(
            room_id = %request.room_id,
            user_id = %request.user_id,
            %connection_id,
            created = outcome.created,
            participants = outcome.participant_count,
            "participant joined"
        );
        Ok(outcome)
    }

    /// Explicit leave; the connection must be joined as `user_id` in `room_id`
    pub fn leave(
        &self,
        connection_id: ConnectionId,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        let binding = self.ensure_self(&connection_id, room_id, user_id)?;
        self.depart(connection_id, binding);
        Ok(())
    }

    /// Transport closed: forget the connection and leave whatever it was joined to
    pub fn disconnect(&self, connection_id: ConnectionId) {
        if let Some(binding) = self.registry.unregister_connection(&connection_id) {
            self.depart(connection_id, binding);
        }
    }

    fn depart(&self, connection_id: ConnectionId, binding: Binding) {
        self.registry.unbind(&connection_id, &binding.room_id);
        self.sessions.release_for(&binding.identity, &connection_id);

        let result = self.registry.with_room(&binding.room_id, |entry| {
            entry.remove_member(&connection_id);

            // a newer connection owns the participant now; leave it alone
            let owned = entry
                .participant(&binding.user_id)
                .is_some_and(|p| p.connection_id == connection_id);
            if !owned {
                return Ok(None);
            }

            let removal = entry.remove_participant(&binding.user_id);
            entry.broadcast(&ServerMessage::ParticipantLeft {
                user_id: binding.user_id.clone(),
            });
            entry.broadcast_participants();

            let token = (removal.remaining_count == 0).then(|| entry.arm_eviction());
            Ok(Some((removal.remaining_count, token)))
        });

        match result {
            Ok(Some((remaining, token))) => {
                counter!(PARTICIPANT_LEFT).increment(1);
                info!(
                    room_id = %binding.room_id,
                    user_id = %binding.user_id,
                    remaining,
                    "participant left"
                );
                if let Some(token) = token {
                    self.scheduler.schedule(&binding.room_id, token);
                }
            },
            Ok(None) => {},
            // room already gone; nothing left to clean up
            Err(_) => debug!(room_id = %binding.room_id, "leave for a closed room"),
        }
    }

    /// Self-service requests may only change the caller's own participant
    fn ensure_self(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
    ) -> Result<Binding, AppError> {
        let binding = self
            .registry
            .binding(connection_id)
            .filter(|b| b.room_id == room_id)
            .ok_or_else(|| AppError::NotJoined(room_id.to_string()))?;
        if binding.user_id != user_id {
            return Err(AppError::NotSelf);
        }
        Ok(binding)
    }

    fn update_self(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        apply: impl FnOnce(&mut ParticipantInfo) -> ServerMessage,
    ) -> Result<(), AppError> {
        self.ensure_self(connection_id, room_id, user_id)?;
        self.registry.with_room(room_id, |entry| {
            let participant = entry
                .participant_mut(user_id)
                .ok_or_else(|| AppError::ParticipantNotFound(user_id.to_string()))?;
            let fact = apply(&mut participant.info);
            entry.broadcast(&fact);
            entry.broadcast_participants();
            Ok(())
        })
    }

    pub fn set_muted(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        muted: bool,
    ) -> Result<(), AppError> {
        self.update_self(connection_id, room_id, user_id, |info| {
            info.is_muted = muted;
            ServerMessage::ParticipantMuted {
                user_id: info.user_id.clone(),
                is_muted: muted,
            }
        })
    }

    pub fn set_hand_raised(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        raised: bool,
    ) -> Result<(), AppError> {
        self.update_self(connection_id, room_id, user_id, |info| {
            info.is_hand_raised = raised;
            ServerMessage::HandRaised {
                user_id: info.user_id.clone(),
                raised,
            }
        })
    }

    pub fn set_video(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        has_video: bool,
    ) -> Result<(), AppError> {
        self.update_self(connection_id, room_id, user_id, |info| {
            info.has_video = has_video;
            ServerMessage::VideoToggled {
                user_id: info.user_id.clone(),
                has_video,
            }
        })
    }

    pub fn set_screen_share(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        is_sharing: bool,
    ) -> Result<(), AppError> {
        self.update_self(connection_id, room_id, user_id, |info| {
            info.is_screen_sharing = is_sharing;
            ServerMessage::ScreenShareToggled {
                user_id: info.user_id.clone(),
                is_sharing,
            }
        })
    }

    /// Reactions are transient: broadcast, never stored
    pub fn send_reaction(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        user_id: &str,
        reaction: String,
    ) -> Result<(), AppError> {
        self.ensure_self(connection_id, room_id, user_id)?;
        self.registry.with_room(room_id, |entry| {
            entry.broadcast(&ServerMessage::ReactionSent {
                user_id: user_id.to_string(),
                reaction,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatFanout, ChatRequest};
    use crate::registry::NewRoom;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        registry: Arc<Registry>,
        sessions: Arc<SessionGuard>,
        presence: Presence,
        directory: broadcast::Receiver<DirectoryEvent>,
    }

    struct Client {
        conn: ConnectionId,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn harness(grace: Duration) -> Harness {
        let registry = Arc::new(Registry::new(true));
        let sessions = Arc::new(SessionGuard::new());
        let (tx, directory) = broadcast::channel(16);
        let scheduler = Arc::new(EvictionScheduler::new(
            registry.clone(),
            sessions.clone(),
            grace,
            tx,
        ));
        registry
            .create_room(NewRoom::new("Seminar", "host").with_id("r1"))
            .unwrap();
        Harness {
            presence: Presence::new(registry.clone(), sessions.clone(), scheduler),
            registry,
            sessions,
            directory,
        }
    }

    fn connect(h: &Harness) -> Client {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        h.registry.register_connection(conn, tx);
        Client { conn, rx }
    }

    fn join(h: &Harness, client: &Client, user: &str) -> Result<JoinOutcome, AppError> {
        h.presence.join(client.conn, JoinRequest::new("r1", user, user.to_uppercase()))
    }

    #[tokio::test]
    async fn test_join_sends_snapshot_to_joiner() {
        let h = harness(Duration::from_secs(30));
        let mut a = connect(&h);

        let outcome = join(&h, &a, "a").unwrap();
        assert!(outcome.created);

        let msgs = a.drain();
        assert!(matches!(
            &msgs[0],
            ServerMessage::ParticipantJoined { participant } if participant.user_id == "a"
        ));
        assert!(matches!(
            &msgs[1],
            ServerMessage::ParticipantsUpdated { participants } if participants.len() == 1
        ));
        assert!(matches!(&msgs[2], ServerMessage::ChatHistory { messages } if messages.is_empty()));
        assert!(matches!(&msgs[3], ServerMessage::RoomSettingsUpdated { .. }));
        assert_eq!(msgs.len(), 4);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let h = harness(Duration::from_secs(30));
        let mut a = connect(&h);
        let mut b = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();
        a.drain();
        b.drain();

        let again = join(&h, &b, "b").unwrap();
        assert!(!again.created);
        assert_eq!(again.participant_count, 2);
        assert_eq!(h.registry.list_participants("r1").unwrap().len(), 2);

        // no second announcement to the room
        assert!(a.drain().is_empty());
        let to_b = b.drain();
        assert!(!to_b.iter().any(|m| matches!(m, ServerMessage::ParticipantJoined { .. })));
        assert!(matches!(&to_b[0], ServerMessage::ParticipantsUpdated { .. }));
        assert!(matches!(&to_b[1], ServerMessage::ChatHistory { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_login_scenario() {
        let h = harness(Duration::from_secs(30));
        let c1 = connect(&h);
        let c2 = connect(&h);

        let request = JoinRequest::new("r1", "u", "U").with_email("u@example.com");
        h.presence.join(c1.conn, request.clone()).unwrap();

        assert!(matches!(
            h.presence.join(c2.conn, request.clone()),
            Err(AppError::DuplicateSession)
        ));
        // the rejected attempt does not disturb c1
        assert!(h.sessions.is_active("u@example.com"));
        assert_eq!(h.registry.list_participants("r1").unwrap().len(), 1);

        h.presence.disconnect(c1.conn);
        assert!(!h.sessions.is_active("u@example.com"));

        let outcome = h.presence.join(c2.conn, request).unwrap();
        assert!(outcome.created);
        assert_eq!(h.sessions.get("u@example.com").unwrap().connection_id, c2.conn);
    }

    #[tokio::test]
    async fn test_other_device_is_distinct_denial() {
        let h = harness(Duration::from_secs(30));
        h.registry
            .create_room(NewRoom::new("Other", "host").with_id("r2"))
            .unwrap();
        let c1 = connect(&h);
        let c2 = connect(&h);

        h.presence.join(c1.conn, JoinRequest::new("r1", "u", "U")).unwrap();
        assert!(matches!(
            h.presence.join(c2.conn, JoinRequest::new("r2", "u", "U")),
            Err(AppError::ActiveElsewhere)
        ));
    }

    #[tokio::test]
    async fn test_leave_broadcasts_to_remaining() {
        let h = harness(Duration::from_secs(30));
        let mut a = connect(&h);
        let b = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();
        a.drain();

        h.presence.leave(b.conn, "r1", "b").unwrap();

        let msgs = a.drain();
        assert!(matches!(&msgs[0], ServerMessage::ParticipantLeft { user_id } if user_id == "b"));
        assert!(matches!(
            &msgs[1],
            ServerMessage::ParticipantsUpdated { participants } if participants.len() == 1
        ));
        assert!(h.registry.binding(&b.conn).is_none());
        assert!(!h.sessions.is_active("b"));
    }

    #[tokio::test]
    async fn test_leave_requires_own_binding() {
        let h = harness(Duration::from_secs(30));
        let a = connect(&h);
        let b = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();

        assert!(matches!(h.presence.leave(a.conn, "r1", "b"), Err(AppError::NotSelf)));
        assert!(matches!(h.presence.leave(a.conn, "r2", "a"), Err(AppError::NotJoined(_))));
        assert_eq!(h.registry.list_participants("r1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_joining_another_room_leaves_the_first() {
        let h = harness(Duration::from_secs(30));
        h.registry
            .create_room(NewRoom::new("Other", "host").with_id("r2"))
            .unwrap();
        let a = connect(&h);
        join(&h, &a, "a").unwrap();

        h.presence.join(a.conn, JoinRequest::new("r2", "a", "A")).unwrap();
        assert!(h.registry.list_participants("r1").unwrap().is_empty());
        assert_eq!(h.registry.list_participants("r2").unwrap().len(), 1);
        assert_eq!(h.registry.binding(&a.conn).unwrap().room_id, "r2");
    }

    #[tokio::test]
    async fn test_muted_by_default_applies_to_joiners() {
        let h = harness(Duration::from_secs(30));
        h.registry
            .with_room("r1", |entry| {
                Registry::update_record(entry, |room| room.muted_by_default = true).map(|_| ())
            })
            .unwrap();
        let a = connect(&h);
        join(&h, &a, "a").unwrap();
        assert!(h.registry.list_participants("r1").unwrap()[0].is_muted);
    }

    #[tokio::test]
    async fn test_self_service_toggles() {
        let h = harness(Duration::from_secs(30));
        let mut a = connect(&h);
        let b = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();
        a.drain();

        h.presence.set_hand_raised(&b.conn, "r1", "b", true).unwrap();
        h.presence.set_video(&b.conn, "r1", "b", true).unwrap();
        h.presence.set_screen_share(&b.conn, "r1", "b", true).unwrap();
        h.presence.set_muted(&b.conn, "r1", "b", true).unwrap();
        h.presence
            .send_reaction(&b.conn, "r1", "b", "👏".to_string())
            .unwrap();

        let msgs = a.drain();
        assert!(matches!(&msgs[0], ServerMessage::HandRaised { raised: true, .. }));
        assert!(matches!(&msgs[2], ServerMessage::VideoToggled { has_video: true, .. }));
        assert!(matches!(&msgs[4], ServerMessage::ScreenShareToggled { is_sharing: true, .. }));
        assert!(matches!(&msgs[6], ServerMessage::ParticipantMuted { is_muted: true, .. }));
        assert!(matches!(
            &msgs[8],
            ServerMessage::ReactionSent { reaction, .. } if reaction == "👏"
        ));

        let info = h
            .registry
            .list_participants("r1")
            .unwrap()
            .into_iter()
            .find(|p| p.user_id == "b")
            .unwrap();
        assert!(info.is_hand_raised && info.has_video && info.is_screen_sharing && info.is_muted);

        // no flipping someone else's flags
        assert!(matches!(
            h.presence.set_muted(&a.conn, "r1", "b", false),
            Err(AppError::NotSelf)
        ));
    }

    #[tokio::test]
    async fn test_history_replay_hides_other_peoples_private_messages() {
        let h = harness(Duration::from_secs(30));
        let chat = ChatFanout::new(h.registry.clone(), 1024);
        let a = connect(&h);
        let b = connect(&h);
        let mut c = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();
        join(&h, &c, "c").unwrap();

        // b is away when the private message arrives
        h.presence.leave(b.conn, "r1", "b").unwrap();
        chat.send("r1", &a.conn, ChatRequest::public("a", "A", "hello all"))
            .unwrap();
        chat.send("r1", &a.conn, ChatRequest::private("a", "A", "b", "secret"))
            .unwrap();

        fn bodies(msgs: Vec<ServerMessage>) -> Vec<String> {
            msgs.into_iter()
                .find_map(|m| match m {
                    ServerMessage::ChatHistory { messages } => {
                        Some(messages.into_iter().map(|m| m.body).collect())
                    },
                    _ => None,
                })
                .expect("no chat history sent")
        }

        h.presence.leave(c.conn, "r1", "c").unwrap();
        c.drain();
        join(&h, &c, "c").unwrap();
        assert_eq!(bodies(c.drain()), ["hello all"]);

        let mut b_again = connect(&h);
        join(&h, &b_again, "b").unwrap();
        assert_eq!(bodies(b_again.drain()), ["hello all", "secret"]);
    }

    #[tokio::test]
    async fn test_room_that_regains_a_participant_is_not_evicted() {
        let h = harness(Duration::from_millis(100));
        let a = connect(&h);
        join(&h, &a, "a").unwrap();

        h.presence.leave(a.conn, "r1", "a").unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        join(&h, &a, "a").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.registry.get_room("r1").is_some());
        assert_eq!(h.registry.list_participants("r1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_room_is_evicted_once() {
        let mut h = harness(Duration::from_millis(50));
        let mut a = connect(&h);
        let b = connect(&h);
        join(&h, &a, "a").unwrap();
        join(&h, &b, "b").unwrap();

        // leave, rejoin and leave again: two timers armed, only the last may fire
        h.presence.leave(a.conn, "r1", "a").unwrap();
        h.presence.leave(b.conn, "r1", "b").unwrap();
        join(&h, &b, "b").unwrap();
        h.presence.disconnect(b.conn);
        a.drain();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.registry.get_room("r1").is_none());
        assert!(matches!(
            h.directory.try_recv(),
            Ok(DirectoryEvent::RoomClosed { room_id }) if room_id == "r1"
        ));
        assert!(h.directory.try_recv().is_err());
        assert!(h.registry.with_room("r1", |_| Ok(())).is_err());
    }

    #[tokio::test]
    async fn test_close_now_releases_sessions() {
        let h = harness(Duration::from_secs(30));
        let mut a = connect(&h);
        join(&h, &a, "a").unwrap();
        a.drain();

        let scheduler = EvictionScheduler::new(
            h.registry.clone(),
            h.sessions.clone(),
            Duration::from_secs(30),
            broadcast::channel(1).0,
        );
        let closed = scheduler.close_now("r1").unwrap();
        assert_eq!(closed.participants.len(), 1);
        assert!(matches!(a.drain().as_slice(), [ServerMessage::RoomClosed { .. }]));
        assert!(!h.sessions.is_active("a"));
        assert!(h.registry.binding(&a.conn).is_none());

        // stale requests fail gracefully
        assert!(matches!(
            h.presence.set_muted(&a.conn, "r1", "a", true),
            Err(AppError::NotJoined(_))
        ));
    }
}
