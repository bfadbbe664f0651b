use axum::extract::ws::Message;

use serde::{Deserialize, Serialize};

use crate::presence::{PresenceEntry, PresenceKind};
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Inbound application messages. Tagged by `type`; unknown fields are
/// ignored and missing optional fields default to `None`, so a sloppy
/// client degrades to placeholder identities instead of an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// An admin dashboard attaching itself to the feed.
    AdminIdentify {
        #[serde(default)]
        external_id: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    /// A visitor declaring itself a guest or member. A missing `kind` is
    /// treated as a guest rather than rejected.
    PresenceIdentify {
        #[serde(default)]
        kind: PresenceKind,
        #[serde(default)]
        external_id: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
}

/// Outbound application messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    PresenceSnapshot {
        count: usize,
        entries: Vec<PresenceEntry>,
    },
    Error {
        code: u16,
        message: String,
    },
}

/// Handle an incoming text (JSON) message.
/// Decodes the tagged message, dispatches to the presence registry.
pub fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    connection_id: &str,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to decode client message"
            );
            send_error(tx, 400, "Invalid message");
            return;
        }
    };

    match message {
        ClientMessage::AdminIdentify {
            external_id,
            display_name,
        } => {
            state
                .registry
                .on_admin_identify(connection_id, external_id, display_name);

            // The dashboard needs an initial view but admin identify never
            // broadcasts, so hand the current snapshot to this connection only.
            let snapshot = state.registry.snapshot();
            send_message(
                tx,
                &ServerMessage::PresenceSnapshot {
                    count: snapshot.count,
                    entries: snapshot.entries,
                },
            );
        }
        ClientMessage::PresenceIdentify {
            kind,
            external_id,
            display_name,
        } => {
            state
                .registry
                .on_member_or_guest_identify(connection_id, kind, external_id, display_name);
        }
    }
}

/// Encode and send a message as a text WebSocket frame.
pub fn send_message(tx: &ConnectionSender, message: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let _ = tx.send(Message::Text(json.into()));
    }
}

/// Send an error response on this connection only.
fn send_error(tx: &ConnectionSender, code: u16, message: &str) {
    send_message(
        tx,
        &ServerMessage::Error {
            code,
            message: message.to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_messages_tolerate_missing_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"presence-identify","kind":"guest"}"#).unwrap();
        match msg {
            ClientMessage::PresenceIdentify {
                kind,
                external_id,
                display_name,
            } => {
                assert_eq!(kind, PresenceKind::Guest);
                assert_eq!(external_id, None);
                assert_eq!(display_name, None);
            }
            other => panic!("Expected PresenceIdentify, got: {other:?}"),
        }
    }

    #[test]
    fn admin_identify_ignores_unknown_fields() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"admin-identify","externalId":"admin1","role":"moderator"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::AdminIdentify { external_id, .. } => {
                assert_eq!(external_id.as_deref(), Some("admin1"));
            }
            other => panic!("Expected AdminIdentify, got: {other:?}"),
        }
    }

    #[test]
    fn snapshot_message_uses_wire_naming() {
        let json = serde_json::to_value(ServerMessage::PresenceSnapshot {
            count: 0,
            entries: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "presence-snapshot");
        assert_eq!(json["count"], 0);
    }
}
