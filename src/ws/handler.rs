use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
};
use std::net::SocketAddr;

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. Connections carry no credentials; identity
/// arrives later as an application-level identify message. The peer address
/// is captured here because it is immutable for the connection's lifetime.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_address = addr.ip().to_string();
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, remote_address))
}
