//! Common Test Utilities
//!
//! In-process WebSocket server and HTTP CONNECT proxy.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use session_keeper::application::{ControllerConfig, HeartbeatPolicy, ReconnectPolicy};
use session_keeper::domain::{Endpoint, ProxyResolver};
use session_keeper::domain::{EgressInfo, ProxyDescriptor};
use session_keeper::shared::ProxyError;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

/// WebSocket server accepting any number of connections.
pub struct TestServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(connection) = ServerConnection::accept(stream).await {
                        let _ = tx.send(connection);
                    }
                });
            }
        });

        Self {
            addr,
            connections: rx,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&format!("ws://{}", self.addr)).unwrap()
    }

    pub async fn next_connection(&mut self) -> ServerConnection {
        within(self.connections.recv()).await.unwrap()
    }

    pub fn try_next_connection(&mut self) -> Option<ServerConnection> {
        self.connections.try_recv().ok()
    }
}

/// Server side of one accepted WebSocket.
pub struct ServerConnection {
    pub ws: WebSocketStream<TcpStream>,
    pub headers: HeaderMap,
}

impl ServerConnection {
    async fn accept(stream: TcpStream) -> Option<Self> {
        let (headers_tx, headers_rx) = oneshot::channel();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = headers_tx.send(request.headers().clone());
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.ok()?;
        let headers = headers_rx.await.ok()?;
        Some(Self { ws, headers })
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// WebSocket-level ping, no application payload.
    pub async fn send_control_ping(&mut self) {
        self.ws.send(Message::Ping(Vec::new())).await.unwrap();
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            match within(self.ws.next()).await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Send an AUTH challenge and return the client's reply.
    pub async fn authenticate(&mut self, challenge_id: &str) -> Value {
        self.send_json(json!({"id": challenge_id, "action": "AUTH", "data": {}}))
            .await;
        self.recv_json().await
    }

    /// Wait until the client closes or drops the connection.
    pub async fn closed_by_client(&mut self) -> bool {
        loop {
            match within(self.ws.next()).await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Minimal HTTP CONNECT proxy. Reports each requested target.
pub struct ConnectProxy {
    pub addr: SocketAddr,
    targets: mpsc::UnboundedReceiver<String>,
}

impl ConnectProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((client, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(tunnel(client, tx));
            }
        });

        Self { addr, targets: rx }
    }

    pub fn descriptor(&self) -> ProxyDescriptor {
        ProxyDescriptor::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub async fn next_target(&mut self) -> String {
        within(self.targets.recv()).await.unwrap()
    }
}

async fn tunnel(mut client: TcpStream, targets: mpsc::UnboundedSender<String>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match client.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let (Some("CONNECT"), Some(target)) = (request_line.next(), request_line.next()) else {
        let _ = client.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n").await;
        return;
    };
    let target = target.to_string();

    let Ok(mut upstream) = TcpStream::connect(target.as_str()).await else {
        let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
        return;
    };
    let _ = targets.send(target);

    if client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await
        .is_err()
    {
        return;
    }
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// Resolver that accepts every proxy without touching the network.
pub struct StaticResolver;

#[async_trait::async_trait]
impl ProxyResolver for StaticResolver {
    async fn verify(&self, _proxy: &ProxyDescriptor) -> Result<EgressInfo, ProxyError> {
        Ok(serde_json::from_value(json!({"ip": "192.0.2.10", "country": "US"})).unwrap())
    }
}

pub fn static_resolver() -> Arc<dyn ProxyResolver> {
    Arc::new(StaticResolver)
}

/// Fast timings for real-socket tests.
pub fn controller_config(endpoint: Endpoint) -> ControllerConfig {
    let mut config = ControllerConfig::new(vec![endpoint]);
    config.heartbeat = HeartbeatPolicy {
        ping_interval: Duration::from_millis(200),
        stale_threshold: Duration::from_secs(3),
        check_interval: Duration::from_millis(50),
    };
    config.reconnect = ReconnectPolicy {
        interval: Duration::from_millis(50),
        max_interval: Duration::from_millis(50),
        max_consecutive_failures: Some(5),
        count_proxy_failures: true,
    };
    config.connect_timeout = Duration::from_secs(2);
    config.headers.insert("User-Agent", "session-keeper-tests");
    config
}
