use axum::{extract::State, routing::get, Json, Router};

use crate::presence::PresenceSnapshot;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /api/presence — Pull-based view of the same snapshot the WebSocket
/// feed pushes. Used by dashboards that poll instead of subscribing.
async fn get_presence(State(state): State<AppState>) -> Json<PresenceSnapshot> {
    Json(state.registry.snapshot())
}

/// GET /api/health — Liveness probe with connection counts.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.connection_count(),
        "visible": state.registry.snapshot().count,
    }))
}

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/api/presence", get(get_presence))
        .route("/api/health", get(health))
        .with_state(state)
}
