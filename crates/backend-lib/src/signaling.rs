// ============================
// crates/backend-lib/src/signaling.rs
// ============================
//! WebRTC signaling relay.
//!
//! Offers, answers and ICE candidates are forwarded unmodified to the one
//! connection currently bound to the target participant. Payloads are opaque.
use crate::metrics::{SIGNAL_DROPPED, SIGNAL_RELAYED};
use crate::registry::Registry;
use metrics::counter;
use roomsync_common::SignalKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct SignalingRelay {
    registry: Arc<Registry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Forward `payload` to `target_user_id`; returns whether it was delivered.
    /// Messages for peers that are not connected are dropped, never queued.
    pub fn relay(
        &self,
        room_id: &str,
        from_user_id: &str,
        target_user_id: &str,
        kind: SignalKind,
        payload: Value,
    ) -> bool {
        let delivered = self
            .registry
            .with_room(room_id, |entry| {
                let msg = kind.into_message(from_user_id.to_string(), payload);
                Ok(entry.send_to_user(target_user_id, msg))
            })
            .unwrap_or(false);

        if delivered {
            counter!(SIGNAL_RELAYED).increment(1);
        } else {
            counter!(SIGNAL_DROPPED).increment(1);
            debug!(
                room_id,
                from_user_id,
                target_user_id,
                ?kind,
                "signal dropped, target not connected"
            );
        }
        delivered
    }
}
