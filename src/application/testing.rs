//! Scripted transport fakes for controller and supervisor tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::controller::{ControllerConfig, ReconnectPolicy};
use super::heartbeat::HeartbeatPolicy;
use crate::domain::{
    ConnectionHeaders, Connector, Endpoint, OutboundFrame, ProxyBinding, ProxyDescriptor,
    TransportHandle, TransportPeer,
};
use crate::shared::error::TransportError;

/// One call to [`Connector::open`].
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub endpoint: Endpoint,
    pub proxy: Option<ProxyDescriptor>,
    pub verified: bool,
    pub headers: ConnectionHeaders,
}

/// Connector that hands each opened transport's peer side to the test.
pub struct ScriptedConnector {
    opens: Mutex<Vec<OpenRecord>>,
    failures: Mutex<VecDeque<TransportError>>,
    peers: mpsc::UnboundedSender<TransportPeer>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            opens: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            peers: tx,
        };
        (Arc::new(connector), rx)
    }

    /// Make the next `open` call fail with `err`.
    pub fn fail_next(&self, err: TransportError) {
        self.failures.lock().push_back(err);
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&ProxyBinding>,
        headers: &ConnectionHeaders,
    ) -> Result<TransportHandle, TransportError> {
        self.opens.lock().push(OpenRecord {
            endpoint: endpoint.clone(),
            proxy: proxy.map(|b| b.descriptor.clone()),
            verified: proxy.is_some_and(ProxyBinding::is_verified),
            headers: headers.clone(),
        });

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let (handle, peer) = TransportHandle::pair();
        let _ = self.peers.send(peer);
        Ok(handle)
    }
}

/// Next text frame the controller sent, parsed as JSON.
pub async fn next_json(peer: &mut TransportPeer) -> Value {
    match peer.outbound.recv().await {
        Some(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

pub fn test_config() -> ControllerConfig {
    let mut headers = ConnectionHeaders::default();
    headers.insert("User-Agent", "session-keeper-tests");
    ControllerConfig {
        headers,
        heartbeat: HeartbeatPolicy {
            ping_interval: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(10),
            check_interval: Duration::from_secs(1),
        },
        reconnect: ReconnectPolicy {
            max_consecutive_failures: Some(3),
            ..ReconnectPolicy::default()
        },
        connect_timeout: Duration::from_secs(10),
        ..ControllerConfig::new(vec![Endpoint::parse("ws://127.0.0.1:9").unwrap()])
    }
}
