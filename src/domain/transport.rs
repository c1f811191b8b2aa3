//! Transport contract consumed by the session controller.
//!
//! A [`Connector`] opens one logical connection and returns a
//! [`TransportHandle`]. The handle yields an ordered event sequence:
//!
//! ```text
//! Opened? Message* (Closed | Error)
//! ```
//!
//! The driver side of a connection holds the matching [`TransportPeer`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::proxy::ProxyBinding;
use crate::shared::error::TransportError;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Server endpoint a transport connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse an endpoint; a bare `host:port` implies `wss://`.
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let trimmed = raw.trim();
        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("wss://{}", trimmed)
        };

        let invalid = |reason: String| TransportError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason,
        };

        let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(invalid(format!("unsupported scheme `{}`", other))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".into()));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host without IPv6 brackets.
    pub fn host(&self) -> String {
        match self.url.host() {
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Static HTTP headers presented at WebSocket upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHeaders(BTreeMap<String, String>);

impl ConnectionHeaders {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self(headers)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lifecycle event delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(Vec<u8>),
    /// Control frame (ping/pong) received; proves the peer is alive
    Activity,
    Closed { code: u16, reason: String },
    Error(String),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Error(_))
    }
}

/// Frame queued by the controller for the driver to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Driver side of a transport connection.
pub struct TransportPeer {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

/// Controller side of a transport connection.
///
/// Exclusively owned by one session controller. Dropping the handle
/// terminates the driver task.
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    driver: Option<JoinHandle<()>>,
    open: bool,
    finished: bool,
}

impl TransportHandle {
    /// Create a connected handle/peer pair.
    pub fn pair() -> (Self, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = Self {
            outbound: outbound_tx,
            events: events_rx,
            driver: None,
            open: false,
            finished: false,
        };
        let peer = TransportPeer {
            events: events_tx,
            outbound: outbound_rx,
        };
        (handle, peer)
    }

    /// Attach the task driving the peer side.
    pub fn with_driver(mut self, driver: JoinHandle<()>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Next lifecycle event. Returns `None` once a terminal event has been
    /// delivered, after `terminate`, or when the peer disappears.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }

        let event = self.events.recv().await;
        match &event {
            Some(TransportEvent::Opened) => self.open = true,
            Some(e) if e.is_terminal() => {
                self.open = false;
                self.finished = true;
            }
            Some(_) => {}
            None => {
                self.open = false;
                self.finished = true;
            }
        }
        event
    }

    /// Queue a text frame.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| TransportError::NotOpen)
    }

    /// Request a graceful close. Events keep flowing until `Closed`.
    pub fn close(&mut self) {
        if self.open {
            let _ = self.outbound.send(OutboundFrame::Close);
        }
        self.open = false;
    }

    /// Non-graceful termination: abort the driver and stop delivering events.
    pub fn terminate(&mut self) {
        self.open = false;
        self.finished = true;
        self.events.close();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Opens transports, directly or through a proxy binding.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&ProxyBinding>,
        headers: &ConnectionHeaders,
    ) -> Result<TransportHandle, TransportError>;
}
