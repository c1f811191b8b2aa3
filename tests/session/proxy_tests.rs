//! Sessions tunneled through an HTTP CONNECT proxy.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use session_keeper::application::{Supervisor, SupervisorSummary, SessionController};
use session_keeper::domain::{Identity, ProxyDescriptor};
use session_keeper::infrastructure::WebSocketConnector;
use session_keeper::shared::SessionError;

use crate::common::*;

fn identity() -> Identity {
    Identity::new("proxied-user").unwrap()
}

#[tokio::test]
async fn test_session_through_connect_proxy() {
    let mut server = TestServer::start().await;
    let mut proxy = ConnectProxy::start().await;

    let handle = SessionController::new(
        Arc::new(controller_config(server.endpoint())),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), Some(proxy.descriptor()));

    assert_eq!(proxy.next_target().await, server.addr.to_string());
    let mut conn = server.next_connection().await;
    let auth = conn.authenticate("via-proxy").await;
    assert_eq!(auth["result"]["user_id"], "proxied-user");

    let status = handle.status();
    assert_eq!(status.slot, proxy.descriptor().to_string());
    assert_eq!(status.egress.unwrap().ip, "192.0.2.10");

    // The reconnect goes through the same proxy.
    conn.ws.close(None).await.unwrap();
    assert_eq!(proxy.next_target().await, server.addr.to_string());
    server.next_connection().await.authenticate("again").await;

    handle.stop();
    within(handle.join()).await.unwrap();
}

#[tokio::test]
async fn test_dead_proxy_gives_up_without_reaching_server() {
    let mut server = TestServer::start().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = ProxyDescriptor::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    drop(listener);

    let mut config = controller_config(server.endpoint());
    config.verify_proxy = false;
    config.reconnect.max_consecutive_failures = Some(2);

    let handle = SessionController::new(
        Arc::new(config),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    )
    .start(identity(), Some(dead));

    let err = within(handle.join()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::PermanentFailure { failures: 2, .. }
    ));
    assert!(server.try_next_connection().is_none());
}

#[tokio::test]
async fn test_supervisor_runs_direct_and_proxied_slots() {
    let mut server = TestServer::start().await;
    let proxy = ConnectProxy::start().await;

    let supervisor = Supervisor::new(
        Arc::new(controller_config(server.endpoint())),
        Arc::new(WebSocketConnector::new()),
        static_resolver(),
    );
    supervisor.spawn(&identity(), vec![None, Some(proxy.descriptor())]);

    let mut connections = Vec::new();
    for challenge in ["one", "two"] {
        let mut conn = server.next_connection().await;
        conn.authenticate(challenge).await;
        connections.push(conn);
    }

    within(async {
        while supervisor.summary().authenticated < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;

    within(supervisor.shutdown()).await;
    assert_eq!(
        supervisor.summary(),
        SupervisorSummary {
            total: 2,
            stopped: 2,
            ..SupervisorSummary::default()
        }
    );
}
