//! Infrastructure Layer
//!
//! Implementations of the domain seams against the outside world:
//! - WebSocket transports (tokio-tungstenite, rustls)
//! - Proxy tunnels (SOCKS5, HTTP CONNECT) and HTTP reachability probes
//! - Proxy list loading

pub mod proxy;
pub mod transport;

pub use proxy::{load_proxies, HttpProbeResolver};
pub use transport::WebSocketConnector;
