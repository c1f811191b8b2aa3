//! Account identity a session authenticates as.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user/account token.
///
/// Immutable for the lifetime of a session controller. The token is sent
/// verbatim as `user_id` in the authentication response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity from a raw token, trimming surrounding whitespace.
    pub fn new(token: impl AsRef<str>) -> Result<Self, EmptyIdentity> {
        let token = token.as_ref().trim();
        if token.is_empty() {
            return Err(EmptyIdentity);
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = EmptyIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Returned when an identity token is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("identity token must not be empty")]
pub struct EmptyIdentity;
