//! Wire Protocol
//!
//! JSON-over-WebSocket-text messages exchanged with the server.

pub mod messages;

pub use messages::{Action, AuthResponse, AuthResult, ClientProfile, Inbound, PingMessage};
