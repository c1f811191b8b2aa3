//! WebSocket transport over tokio-tungstenite.
//!
//! The connector dials the endpoint (through the bound proxy when there is
//! one), performs the TLS and WebSocket handshakes, then hands the socket
//! to a driver task that translates frames into [`TransportEvent`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, Instrument, Span};

use crate::domain::{
    ConnectionHeaders, Connector, Endpoint, OutboundFrame, ProxyBinding, TransportEvent,
    TransportHandle, TransportPeer, ABNORMAL_CLOSURE,
};
use crate::infrastructure::proxy::tunnel;
use crate::shared::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the server's close frame carries no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long the driver waits to flush its side of a close handshake.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// [`Connector`] producing real WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&ProxyBinding>,
        headers: &ConnectionHeaders,
    ) -> Result<TransportHandle, TransportError> {
        let request = build_request(endpoint, headers)?;

        let stream = tunnel::dial(
            &endpoint.host(),
            endpoint.port(),
            proxy.map(|binding| &binding.descriptor),
        )
        .await?;

        let (socket, response) = client_async_tls_with_config(request, stream, None, None)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(
            endpoint = %endpoint,
            status = response.status().as_u16(),
            "WebSocket handshake completed"
        );

        let (handle, peer) = TransportHandle::pair();
        let driver = tokio::spawn(drive(socket, peer).instrument(Span::current()));
        Ok(handle.with_driver(driver))
    }
}

/// Upgrade request for `endpoint` carrying the configured headers.
fn build_request(endpoint: &Endpoint, headers: &ConnectionHeaders) -> Result<Request, TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut request = endpoint
        .url()
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;

    for (name, value) in headers.iter() {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("header `{}`: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("header `{}`: {}", name, e)))?;
        request.headers_mut().insert(header, header_value);
    }
    Ok(request)
}

/// Pump frames between the socket and the controller until either side ends.
async fn drive(socket: WsStream, peer: TransportPeer) {
    let TransportPeer {
        events,
        mut outbound,
    } = peer;
    let (mut sink, mut stream) = socket.split();

    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let mut closing = false;
    loop {
        tokio::select! {
            frame = outbound.recv(), if !closing => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                Some(OutboundFrame::Close) => {
                    closing = true;
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                None => {
                    // Controller went away without closing.
                    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
                    return;
                }
            },

            message = stream.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text.into_bytes()),
                    Some(Ok(Message::Binary(data))) => TransportEvent::Message(data),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => TransportEvent::Activity,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        // Flush our reply to the close handshake.
                        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
                        TransportEvent::Closed { code, reason }
                    }
                    Some(Ok(other)) => {
                        trace!(frame = ?other, "Control frame");
                        continue;
                    }
                    Some(Err(e)) => TransportEvent::Error(e.to_string()),
                    None => TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped".into(),
                    },
                };

                let terminal = event.is_terminal();
                if events.send(event).is_err() || terminal {
                    return;
                }
            }
        }
    }
}
