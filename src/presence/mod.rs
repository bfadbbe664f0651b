//! Visitor-presence registry and broadcast trigger.
//!
//! In-memory table (DashMap) keyed by connection id, one entry per live
//! WebSocket session. Identify messages attach a role and display identity
//! to an entry; membership or identity changes push a role-filtered
//! snapshot through the [`SnapshotSink`] seam to every attached client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Remote address recorded when an identify arrives for a connection the
/// registry never saw connect.
const UNKNOWN_ADDRESS: &str = "unknown";

/// Role attached to a connection by an identify message.
///
/// Transitions only `Unknown -> {Guest, Member, Admin}`. Conflicting
/// identifies are last-write-wins; a role never reverts to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unknown,
    Guest,
    Member,
    Admin,
}

impl Role {
    /// Feed-visibility policy: admins never appear in the presence feed,
    /// and unidentified connections stay hidden until an identify arrives.
    pub fn visible_in_feed(&self) -> bool {
        matches!(self, Role::Guest | Role::Member)
    }

    fn fallback_prefix(&self) -> &'static str {
        match self {
            Role::Unknown => "Connecting",
            Role::Guest => "Guest",
            Role::Member => "Member",
            Role::Admin => "Admin",
        }
    }
}

/// Identify kind for non-admin visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Guest,
    Member,
}

impl Default for PresenceKind {
    fn default() -> Self {
        PresenceKind::Guest
    }
}

impl PresenceKind {
    pub fn role(self) -> Role {
        match self {
            PresenceKind::Guest => Role::Guest,
            PresenceKind::Member => Role::Member,
        }
    }
}

/// One row of the registry table. Private to the registry; the serialized
/// view handed to clients is [`PresenceEntry`].
#[derive(Debug, Clone)]
struct ConnectionEntry {
    connection_id: String,
    display_identity: String,
    role: Role,
    remote_address: String,
    connected_at: DateTime<Utc>,
    external_id: Option<String>,
}

impl ConnectionEntry {
    fn unidentified(connection_id: &str, remote_address: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            display_identity: fallback_identity(Role::Unknown, connection_id),
            role: Role::Unknown,
            remote_address: remote_address.to_string(),
            connected_at: Utc::now(),
            external_id: None,
        }
    }

    fn to_feed_entry(&self) -> PresenceEntry {
        PresenceEntry {
            connection_id: self.connection_id.clone(),
            display_identity: self.display_identity.clone(),
            external_id: self.external_id.clone(),
            connected_at: self.connected_at,
            remote_address: self.remote_address.clone(),
            role: self.role,
        }
    }
}

/// One visible connection as serialized into snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub connection_id: String,
    pub display_identity: String,
    pub external_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub remote_address: String,
    pub role: Role,
}

/// Point-in-time list of visible connections, sent verbatim to all listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub count: usize,
    pub entries: Vec<PresenceEntry>,
}

/// Outbound seam between the registry and the transport layer.
///
/// Fire-and-forget: delivery failures and slow listeners are the
/// transport's concern, never the registry's.
pub trait SnapshotSink: Send + Sync {
    fn deliver(&self, snapshot: PresenceSnapshot);
}

/// Tracks live connections and broadcasts a consistent, role-filtered
/// snapshot whenever visible membership or identity changes.
///
/// Single source of truth for "who is currently connected". Constructed
/// once per process and shared via `Arc` through application state.
pub struct PresenceRegistry {
    connections: DashMap<String, ConnectionEntry>,
    sink: Arc<dyn SnapshotSink>,
}

impl PresenceRegistry {
    pub fn new(sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            connections: DashMap::new(),
            sink,
        }
    }

    /// Register a freshly-opened connection.
    ///
    /// No broadcast: an unidentified connection is not visible in the feed
    /// yet, so nothing observable changed. Calling this twice for the same
    /// id overwrites the first entry without error.
    pub fn on_connect(&self, connection_id: &str, remote_address: &str) {
        self.connections.insert(
            connection_id.to_string(),
            ConnectionEntry::unidentified(connection_id, remote_address),
        );
        tracing::debug!(
            connection_id = %connection_id,
            remote_address = %remote_address,
            "connection registered"
        );
    }

    /// Attach the admin role to a connection.
    ///
    /// No broadcast: admins are excluded from the feed they watch, so their
    /// own churn must not reach other dashboards either.
    pub fn on_admin_identify(
        &self,
        connection_id: &str,
        external_id: Option<String>,
        display_name: Option<String>,
    ) {
        self.apply_identify(connection_id, Role::Admin, external_id, display_name);
    }

    /// Attach a guest or member identity to a connection and broadcast the
    /// resulting snapshot.
    pub fn on_member_or_guest_identify(
        &self,
        connection_id: &str,
        kind: PresenceKind,
        external_id: Option<String>,
        display_name: Option<String>,
    ) {
        self.apply_identify(connection_id, kind.role(), external_id, display_name);
        self.broadcast();
    }

    fn apply_identify(
        &self,
        connection_id: &str,
        role: Role,
        external_id: Option<String>,
        display_name: Option<String>,
    ) {
        // Identify for a connection we never saw connect means a missed
        // connect event; insert a fresh entry rather than dropping the
        // identity on the floor.
        let mut entry = self
            .connections
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionEntry::unidentified(connection_id, UNKNOWN_ADDRESS));

        entry.display_identity =
            resolve_identity(role, display_name, entry_seed(&external_id, connection_id));
        entry.role = role;
        entry.external_id = external_id;

        tracing::debug!(
            connection_id = %connection_id,
            role = ?role,
            display_identity = %entry.display_identity,
            "connection identified"
        );
        // The map guard drops here; callers broadcast only after release,
        // since snapshot() iterates the table.
    }

    /// Remove a connection.
    ///
    /// Broadcasts unless the departed entry was an admin. A disconnect for
    /// an id we do not hold still broadcasts: state may have drifted after
    /// a missed event, and a fresh snapshot lets dashboards converge.
    pub fn on_disconnect(&self, connection_id: &str, reason: &str) {
        match self.connections.remove(connection_id) {
            Some((_, entry)) => {
                tracing::info!(
                    connection_id = %connection_id,
                    role = ?entry.role,
                    reason = %reason,
                    "connection closed"
                );
                if entry.role != Role::Admin {
                    self.broadcast();
                }
            }
            None => {
                tracing::debug!(
                    connection_id = %connection_id,
                    reason = %reason,
                    "disconnect for untracked connection"
                );
                self.broadcast();
            }
        }
    }

    /// Current feed-visible connections, in table iteration order.
    pub fn snapshot(&self) -> PresenceSnapshot {
        let entries: Vec<PresenceEntry> = self
            .connections
            .iter()
            .filter(|entry| entry.value().role.visible_in_feed())
            .map(|entry| entry.value().to_feed_entry())
            .collect();
        PresenceSnapshot {
            count: entries.len(),
            entries,
        }
    }

    /// Compute a snapshot and hand it to the transport for fan-out. The only
    /// path that reaches outside the registry.
    pub fn broadcast(&self) {
        self.sink.deliver(self.snapshot());
    }

    /// Total tracked connections, including hidden ones. Used by the health
    /// endpoint; the feed-visible count is `snapshot().count`.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Pick the identity seed for fallback labels: a supplied external id wins
/// over the connection id.
fn entry_seed<'a>(external_id: &'a Option<String>, connection_id: &'a str) -> &'a str {
    external_id.as_deref().unwrap_or(connection_id)
}

/// Resolve a display identity from an identify payload, substituting a
/// deterministic placeholder when the name is missing or blank.
fn resolve_identity(role: Role, display_name: Option<String>, seed: &str) -> String {
    match display_name {
        Some(name) if !name.trim().is_empty() => name,
        _ => fallback_identity(role, seed),
    }
}

fn fallback_identity(role: Role, seed: &str) -> String {
    format!("{}-{}", role.fallback_prefix(), short_id(seed))
}

/// First five characters of an opaque id, for human-readable placeholders.
fn short_id(id: &str) -> String {
    id.chars().take(5).collect()
}
