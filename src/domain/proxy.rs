//! Proxy descriptors, bindings and the resolver contract.
//!
//! A raw descriptor line is normalized into a [`ProxyDescriptor`]:
//!
//! - surrounding whitespace is trimmed
//! - a line without `scheme://` is treated as `socks5://<line>`
//! - `socks5`, `socks5h` and `http` are supported, anything else is rejected
//! - `user:pass@` userinfo becomes [`ProxyCredentials`]
//!
//! The [`ProxyResolver`] trait is implemented in the infrastructure layer.

use std::fmt;

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::shared::error::ProxyError;

/// Proxy protocol used to tunnel a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    /// SOCKS5, target resolved locally.
    Socks5,
    /// SOCKS5, target resolved by the proxy.
    Socks5h,
    /// HTTP proxy using `CONNECT`.
    Http,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
            Self::Http => "http",
        }
    }

    fn parse(scheme: &str) -> Result<Self, ProxyError> {
        match scheme.to_ascii_lowercase().as_str() {
            "socks5" => Ok(Self::Socks5),
            "socks5h" => Ok(Self::Socks5h),
            "http" => Ok(Self::Http),
            other => Err(ProxyError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username/password presented to the proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Normalized proxy descriptor (scheme + host + port, optional credentials).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub scheme: ProxyScheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyDescriptor {
    /// Normalize a raw descriptor string.
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProxyError::invalid(raw, "empty descriptor"));
        }

        let normalized = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("socks5://{}", trimmed)
        };

        let url = Url::parse(&normalized).map_err(|e| ProxyError::invalid(trimmed, e.to_string()))?;
        let scheme = ProxyScheme::parse(url.scheme())?;

        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            _ => return Err(ProxyError::invalid(trimmed, "missing host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::invalid(trimmed, "missing port"))?;

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(ProxyCredentials {
                username: decode(url.username()),
                password: url.password().map(decode).unwrap_or_default(),
            })
        };

        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }

    /// `host:port`, with brackets around IPv6 literals.
    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    /// Full URL including credentials, as understood by HTTP clients.
    pub fn url(&self) -> String {
        match &self.credentials {
            Some(creds) => format!(
                "{}://{}:{}@{}",
                self.scheme,
                utf8_percent_encode(&creds.username, NON_ALPHANUMERIC),
                utf8_percent_encode(&creds.password, NON_ALPHANUMERIC),
                self.authority()
            ),
            None => format!("{}://{}", self.scheme, self.authority()),
        }
    }
}

/// Never includes the password.
impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// Format `host:port`, bracketing IPv6 literals.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn decode(component: &str) -> String {
    percent_decode_str(component).decode_utf8_lossy().into_owned()
}

/// Egress metadata observed through a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressInfo {
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// A proxy bound to a session, with egress info once verified.
///
/// Sessions without a binding connect directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBinding {
    pub descriptor: ProxyDescriptor,
    pub egress: Option<EgressInfo>,
}

impl ProxyBinding {
    /// Binding used as-is, without a reachability probe.
    pub fn unverified(descriptor: ProxyDescriptor) -> Self {
        Self {
            descriptor,
            egress: None,
        }
    }

    pub fn verified(descriptor: ProxyDescriptor, egress: EgressInfo) -> Self {
        Self {
            descriptor,
            egress: Some(egress),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.egress.is_some()
    }
}

/// Probes a proxy and reports the egress it exposes.
///
/// Expected network failures are reported as [`ProxyError::Unreachable`],
/// never as panics: flaky proxies are the steady state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyResolver: Send + Sync {
    async fn verify(&self, proxy: &ProxyDescriptor) -> Result<EgressInfo, ProxyError>;
}
