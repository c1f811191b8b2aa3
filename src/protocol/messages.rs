//! Message Types
//!
//! Inbound frames carry an `action`; outbound frames are either the
//! authentication response or a heartbeat ping.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::Identity;

/// Action names used on the wire.
pub const ACTION_AUTH: &str = "AUTH";
pub const ACTION_PING: &str = "PING";
pub const ACTION_PONG: &str = "PONG";

/// Inbound message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Authentication challenge
    Auth,
    /// Heartbeat acknowledgment
    Pong,
    /// Anything else, kept for logging
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Auth => ACTION_AUTH,
            Action::Pong => ACTION_PONG,
            Action::Other(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            ACTION_AUTH => Action::Auth,
            ACTION_PONG => Action::Pong,
            _ => Action::Other(name),
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Action::from)
    }
}

/// Incoming message.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Inbound {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }
}

/// Accept string or numeric ids.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Static client constants presented during authentication and heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub user_agent: String,
    pub device_type: String,
    /// Version reported in the auth response
    pub extension_version: String,
    /// Version reported in each ping
    pub ping_version: String,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".into(),
            device_type: "desktop".into(),
            extension_version: "4.28.2".into(),
            ping_version: "1.0.0".into(),
        }
    }
}

/// Response to an `AUTH` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: String,
    pub origin_action: String,
    pub result: AuthResult,
}

/// Auth response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub browser_id: Uuid,
    pub user_id: String,
    pub user_agent: String,
    pub timestamp: i64,
    pub device_type: String,
    pub version: String,
}

impl AuthResponse {
    pub fn new(
        challenge_id: impl Into<String>,
        browser_id: Uuid,
        identity: &Identity,
        profile: &ClientProfile,
        timestamp: i64,
    ) -> Self {
        Self {
            id: challenge_id.into(),
            origin_action: ACTION_AUTH.to_string(),
            result: AuthResult {
                browser_id,
                user_id: identity.as_str().to_string(),
                user_agent: profile.user_agent.clone(),
                timestamp,
                device_type: profile.device_type.clone(),
                version: profile.extension_version.clone(),
            },
        }
    }
}

/// Outbound heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub id: Uuid,
    pub version: String,
    pub action: String,
    pub data: Map<String, Value>,
}

impl PingMessage {
    pub fn new(profile: &ClientProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: profile.ping_version.clone(),
            action: ACTION_PING.to_string(),
            data: Map::new(),
        }
    }
}
