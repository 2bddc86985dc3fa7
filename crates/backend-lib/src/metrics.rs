// ============================
// crates/backend-lib/src/metrics.rs
// ============================
//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_CLOSED: &str = "room.closed";
pub const ROOM_EVICTED: &str = "room.evicted";
pub const ROOM_ACTIVE: &str = "room.active";
pub const PARTICIPANT_JOINED: &str = "participant.joined";
pub const PARTICIPANT_LEFT: &str = "participant.left";
pub const SESSION_REJECTED: &str = "session.rejected";
pub const CHAT_SENT: &str = "chat.sent";
pub const CHAT_REJECTED: &str = "chat.rejected";
pub const SIGNAL_RELAYED: &str = "signal.relayed";
pub const SIGNAL_DROPPED: &str = "signal.dropped";
pub const HOST_ACTION: &str = "host.action";
pub const HOST_DENIED: &str = "host.denied";
