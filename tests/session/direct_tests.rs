//! Direct (unproxied) sessions.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use session_keeper::application::{Lifecycle, SessionController};
use session_keeper::domain::{ConnectionState, Identity};
use session_keeper::infrastructure::WebSocketConnector;
use session_keeper::shared::SessionError;

use crate::common::*;

fn identity() -> Identity {
    Identity::new("integration-user").unwrap()
}

#[tokio::test]
async fn test_direct_session_authenticates_and_heartbeats() {
    let mut server = TestServer::start().await;
    let handle = SessionController::new(
        Arc::new(controller_config(server.endpoint())),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), None);

    let mut conn = server.next_connection().await;
    assert_eq!(conn.headers["user-agent"], "session-keeper-tests");

    let auth = conn.authenticate("challenge-1").await;
    assert_eq!(auth["id"], "challenge-1");
    assert_eq!(auth["origin_action"], "AUTH");
    assert_eq!(auth["result"]["user_id"], "integration-user");

    let ping = conn.recv_json().await;
    assert_eq!(ping["action"], "PING");

    conn.send_json(json!({"id": ping["id"].clone(), "origin_action": "PONG", "action": "PONG"}))
        .await;
    let next = conn.recv_json().await;
    assert_eq!(next["action"], "PING");
    assert_ne!(next["id"], ping["id"]);

    let mut status = handle.subscribe();
    within(status.wait_for(|s| s.state == ConnectionState::Authenticated))
        .await
        .unwrap();

    handle.stop();
    assert!(conn.closed_by_client().await);
    within(handle.join()).await.unwrap();
    assert_eq!(status.borrow().lifecycle, Lifecycle::Stopped);
    assert!(server.try_next_connection().is_none());
}

#[tokio::test]
async fn test_server_close_triggers_single_reconnect() {
    let mut server = TestServer::start().await;
    let handle = SessionController::new(
        Arc::new(controller_config(server.endpoint())),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), None);

    let mut first = server.next_connection().await;
    let first_auth = first.authenticate("a").await;
    first.ws.close(None).await.unwrap();

    let mut second = server.next_connection().await;
    let second_auth = second.authenticate("b").await;

    assert_eq!(second_auth["result"]["user_id"], first_auth["result"]["user_id"]);
    assert_ne!(
        second_auth["result"]["browser_id"],
        first_auth["result"]["browser_id"]
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.try_next_connection().is_none());
    assert_eq!(handle.status().generation, 2);

    handle.stop();
    within(handle.join()).await.unwrap();
}

#[tokio::test]
async fn test_silent_server_is_detected_as_stale() {
    let mut server = TestServer::start().await;
    let mut config = controller_config(server.endpoint());
    config.heartbeat.ping_interval = Duration::from_secs(30);
    config.heartbeat.stale_threshold = Duration::from_millis(400);

    let handle = SessionController::new(
        Arc::new(config),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), None);

    let mut silent = server.next_connection().await;
    silent.authenticate("quiet").await;
    assert_eq!(silent.recv_json().await["action"], "PING");

    // Never answer: the client must drop this socket and dial again.
    let mut replacement = server.next_connection().await;
    assert!(silent.closed_by_client().await);
    assert!(handle
        .status()
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("stale"));

    replacement.authenticate("again").await;
    handle.stop();
    within(handle.join()).await.unwrap();
}

#[tokio::test]
async fn test_control_frames_count_as_inbound_traffic() {
    let mut server = TestServer::start().await;
    let mut config = controller_config(server.endpoint());
    config.heartbeat.ping_interval = Duration::from_secs(30);
    config.heartbeat.stale_threshold = Duration::from_millis(400);

    let handle = SessionController::new(
        Arc::new(config),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), None);

    let mut connection = server.next_connection().await;
    connection.authenticate("control").await;
    assert_eq!(connection.recv_json().await["action"], "PING");

    // The JSON ping stays unanswered; WebSocket pings alone keep it alive.
    for _ in 0..12 {
        connection.send_control_ping().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(server.try_next_connection().is_none());
    assert_eq!(handle.status().state, ConnectionState::Authenticated);

    handle.stop();
    assert!(connection.closed_by_client().await);
    within(handle.join()).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_reaches_failure_ceiling() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = controller_config(
        session_keeper::domain::Endpoint::parse(&format!("ws://{}", addr)).unwrap(),
    );
    config.reconnect.max_consecutive_failures = Some(3);

    let handle = SessionController::new(
        Arc::new(config),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), None);

    let err = within(handle.join()).await.unwrap_err();
    assert!(matches!(err, SessionError::PermanentFailure { failures: 3, .. }));
    assert!(err.to_string().contains("3 consecutive failures"));
}
