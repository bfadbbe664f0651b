pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Listener registry: every attached WebSocket connection, keyed by the
/// server-generated connection id. Snapshot broadcasts fan out to all of
/// them; dashboards and visitors receive the same feed.
pub type ListenerRegistry = Arc<DashMap<String, ConnectionSender>>;

/// Create a new empty listener registry.
pub fn new_listener_registry() -> ListenerRegistry {
    Arc::new(DashMap::new())
}
