use axum::extract::ws::Message;

use crate::presence::{PresenceSnapshot, SnapshotSink};
use crate::ws::protocol::ServerMessage;
use crate::ws::ListenerRegistry;

/// Broadcast a message to all attached listeners.
/// Serialized once; each send is fire-and-forget, so a dead or slow
/// listener never blocks the caller.
pub fn broadcast_to_all(listeners: &ListenerRegistry, message: &ServerMessage) {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(_) => return,
    };
    let frame = Message::Text(json.into());

    for entry in listeners.iter() {
        let _ = entry.value().send(frame.clone());
    }
}

/// Transport-side implementation of the registry's outbound seam: turns a
/// snapshot into a `presence-snapshot` frame and fans it out.
pub struct FanoutSink {
    listeners: ListenerRegistry,
}

impl FanoutSink {
    pub fn new(listeners: ListenerRegistry) -> Self {
        Self { listeners }
    }
}

impl SnapshotSink for FanoutSink {
    fn deliver(&self, snapshot: PresenceSnapshot) {
        broadcast_to_all(
            &self.listeners,
            &ServerMessage::PresenceSnapshot {
                count: snapshot.count,
                entries: snapshot.entries,
            },
        );
    }
}
