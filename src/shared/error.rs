//! Error Types
//!
//! Centralized error taxonomy for the session lifecycle.
//!
//! Only [`SessionError::PermanentFailure`] ever leaves a session controller;
//! every other variant is recovered from locally by reconnecting.

use std::time::Duration;

/// Failures while normalizing, probing, or dialing through a proxy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid proxy descriptor `{descriptor}`: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Proxy {proxy} unreachable: {reason}")]
    Unreachable { proxy: String, reason: String },
}

impl ProxyError {
    pub fn invalid(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(proxy: impl ToString, reason: impl ToString) -> Self {
        Self::Unreachable {
            proxy: proxy.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of a single transport connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Proxy dial failed: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Proxy unreachable: {0}")]
    ProxyUnreachable(ProxyError),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection stale: no inbound traffic for {0:?}")]
    StaleConnection(Duration),

    #[error("Giving up after {failures} consecutive failures (last: {last_error})")]
    PermanentFailure { failures: u32, last_error: String },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Proxy(e) => SessionError::ProxyUnreachable(e),
            other => SessionError::Transport(other),
        }
    }
}

impl From<ProxyError> for SessionError {
    fn from(err: ProxyError) -> Self {
        SessionError::ProxyUnreachable(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
