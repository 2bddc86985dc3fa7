// ============================
// roomsync-backend/src/lib.rs
// ============================
//! Core functionality of the room coordination and WebRTC signaling server.

pub mod chat;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use crate::chat::ChatFanout;
use crate::config::Settings;
use crate::host::HostAuthority;
use crate::presence::{EvictionScheduler, Presence};
use crate::registry::Registry;
use crate::session::SessionGuard;
use crate::signaling::SignalingRelay;
use roomsync_common::DirectoryEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered directory events per subscriber before it starts lagging
const DIRECTORY_CAPACITY: usize = 256;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// Rooms, participants, chat and live connections
    pub registry: Arc<Registry>,
    /// One active session per identity
    pub sessions: Arc<SessionGuard>,
    pub chat: Arc<ChatFanout>,
    pub signaling: Arc<SignalingRelay>,
    pub host: Arc<HostAuthority>,
    pub presence: Arc<Presence>,
    /// Room created/closed notices for directory listeners
    pub directory: broadcast::Sender<DirectoryEvent>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(Registry::new(settings.rooms.allow_adhoc_rooms));
        let sessions = Arc::new(SessionGuard::new());
        let (directory, _) = broadcast::channel(DIRECTORY_CAPACITY);

        let scheduler = Arc::new(EvictionScheduler::new(
            registry.clone(),
            sessions.clone(),
            settings.eviction_grace(),
            directory.clone(),
        ));

        Self {
            chat: Arc::new(ChatFanout::new(
                registry.clone(),
                settings.transport.max_message_bytes,
            )),
            signaling: Arc::new(SignalingRelay::new(registry.clone())),
            host: Arc::new(HostAuthority::new(
                registry.clone(),
                sessions.clone(),
                scheduler.clone(),
            )),
            presence: Arc::new(Presence::new(registry.clone(), sessions.clone(), scheduler)),
            settings: Arc::new(settings),
            registry,
            sessions,
            directory,
        }
    }

    pub fn subscribe_directory(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.directory.subscribe()
    }

    /// Announce a room to directory listeners; nobody listening is fine
    pub fn publish_directory(&self, event: DirectoryEvent) {
        let _ = self.directory.send(event);
    }
}
