//! Integration tests for WebSocket connection lifecycle, identify dispatch,
//! snapshot broadcast, ping/pong, and the REST surface.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use lingopulse::routes;
use lingopulse::state::AppState;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server on a random port and return its address.
async fn start_test_server() -> SocketAddr {
    let state = AppState::new();
    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send message");
}

/// Receive the next application (text) frame, skipping transport pings.
async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Stream ended unexpectedly")
            .expect("WebSocket receive error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Invalid JSON frame")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

/// Assert that no application frame arrives within the window.
async fn expect_silence(ws: &mut WsStream, window: Duration) {
    match tokio::time::timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("Expected silence, got: {:?}", other),
    }
}

#[tokio::test]
async fn guest_identify_broadcasts_to_admin_dashboard() {
    let addr = start_test_server().await;

    // Admin dashboard attaches and identifies; it gets an initial
    // (empty) snapshot unicast back.
    let mut admin = connect(addr).await;
    send_json(
        &mut admin,
        json!({"type": "admin-identify", "externalId": "admin1", "displayName": "Ops"}),
    )
    .await;
    let initial = recv_json(&mut admin).await;
    assert_eq!(initial["type"], "presence-snapshot");
    assert_eq!(initial["count"], 0);

    // A visitor connects and identifies as a guest.
    let mut visitor = connect(addr).await;
    send_json(
        &mut visitor,
        json!({"type": "presence-identify", "kind": "guest", "displayName": "Linh"}),
    )
    .await;

    // The admin receives the broadcast with the visitor's entry.
    let snapshot = recv_json(&mut admin).await;
    assert_eq!(snapshot["type"], "presence-snapshot");
    assert_eq!(snapshot["count"], 1);
    let entry = &snapshot["entries"][0];
    assert_eq!(entry["displayIdentity"], "Linh");
    assert_eq!(entry["role"], "guest");
    assert_eq!(entry["remoteAddress"], "127.0.0.1");
    assert!(entry["connectedAt"].is_string());
}

#[tokio::test]
async fn unidentified_connection_stays_invisible() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();

    let mut visitor = connect(addr).await;

    // Connected but not identified: not visible in the pull snapshot.
    let body: serde_json::Value = client
        .get(format!("http://{}/api/presence", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 0);

    // After a member identify the entry appears.
    send_json(
        &mut visitor,
        json!({"type": "presence-identify", "kind": "member", "externalId": "m-77"}),
    )
    .await;
    let broadcast = recv_json(&mut visitor).await;
    assert_eq!(broadcast["count"], 1);

    let body: serde_json::Value = client
        .get(format!("http://{}/api/presence", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["entries"][0]["role"], "member");
    assert_eq!(body["entries"][0]["externalId"], "m-77");
}

#[tokio::test]
async fn admin_identify_is_not_broadcast_to_others() {
    let addr = start_test_server().await;

    let mut visitor = connect(addr).await;
    send_json(
        &mut visitor,
        json!({"type": "presence-identify", "kind": "guest"}),
    )
    .await;
    let own = recv_json(&mut visitor).await;
    assert_eq!(own["count"], 1);

    // A dashboard identifying must not leak into the visitor's feed.
    let mut admin = connect(addr).await;
    send_json(&mut admin, json!({"type": "admin-identify"})).await;
    let unicast = recv_json(&mut admin).await;
    assert_eq!(unicast["type"], "presence-snapshot");
    assert_eq!(unicast["count"], 1);

    expect_silence(&mut visitor, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn guest_disconnect_broadcasts_departure() {
    let addr = start_test_server().await;

    let mut watcher = connect(addr).await;
    send_json(
        &mut watcher,
        json!({"type": "presence-identify", "kind": "member", "displayName": "Thu"}),
    )
    .await;
    assert_eq!(recv_json(&mut watcher).await["count"], 1);

    let mut guest = connect(addr).await;
    send_json(
        &mut guest,
        json!({"type": "presence-identify", "kind": "guest"}),
    )
    .await;
    assert_eq!(recv_json(&mut watcher).await["count"], 2);

    guest.close(None).await.expect("Failed to close");

    let snapshot = recv_json(&mut watcher).await;
    assert_eq!(snapshot["count"], 1);
    assert_eq!(snapshot["entries"][0]["displayIdentity"], "Thu");
}

#[tokio::test]
async fn admin_disconnect_is_silent() {
    let addr = start_test_server().await;

    let mut visitor = connect(addr).await;
    send_json(
        &mut visitor,
        json!({"type": "presence-identify", "kind": "guest"}),
    )
    .await;
    assert_eq!(recv_json(&mut visitor).await["count"], 1);

    let mut admin = connect(addr).await;
    send_json(&mut admin, json!({"type": "admin-identify"})).await;
    let _ = recv_json(&mut admin).await;

    admin.close(None).await.expect("Failed to close");

    expect_silence(&mut visitor, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn ping_pong() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn malformed_frame_gets_error_response() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("not json".into()))
        .await
        .expect("Failed to send");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["code"], 400);

    // Connection survives the bad frame.
    send_json(&mut ws, json!({"type": "presence-identify", "kind": "guest"})).await;
    assert_eq!(recv_json(&mut ws).await["count"], 1);
}

#[tokio::test]
async fn health_reports_connection_counts() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();

    let mut visitor = connect(addr).await;
    send_json(
        &mut visitor,
        json!({"type": "presence-identify", "kind": "guest"}),
    )
    .await;
    let _ = recv_json(&mut visitor).await;

    let mut admin = connect(addr).await;
    send_json(&mut admin, json!({"type": "admin-identify"})).await;
    let _ = recv_json(&mut admin).await;

    let body: serde_json::Value = client
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["name"], "lingopulse");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["visible"], 1);
}
