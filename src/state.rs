use std::sync::Arc;

use crate::presence::PresenceRegistry;
use crate::ws::broadcast::FanoutSink;
use crate::ws::{self, ListenerRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Presence registry: the single source of truth for who is connected
    pub registry: Arc<PresenceRegistry>,
    /// Active WebSocket connections, by connection id
    pub listeners: ListenerRegistry,
}

impl AppState {
    /// Wire the registry's outbound seam to the WebSocket fan-out.
    /// One registry per process; the listener registry is shared between
    /// the registry's sink and the per-connection actors.
    pub fn new() -> Self {
        let listeners = ws::new_listener_registry();
        let sink = Arc::new(FanoutSink::new(listeners.clone()));
        Self {
            registry: Arc::new(PresenceRegistry::new(sink)),
            listeners,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
