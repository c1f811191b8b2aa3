//! Application settings and configuration structures.

use std::collections::BTreeMap;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::application::{
    ControllerConfig, HeartbeatPolicy, ReconnectPolicy, RestartPolicy,
};
use crate::domain::{ConnectionHeaders, Endpoint, Identity};
use crate::protocol::ClientProfile;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream endpoints and the IP-echo service
    pub server: ServerSettings,

    /// Reconnect, heartbeat and staleness tuning
    pub session: SessionSettings,

    /// Where proxies come from and whether they are probed
    pub proxy: ProxySettings,

    /// The account every session authenticates as
    pub identity: IdentitySettings,

    /// Client fingerprint presented at upgrade and in AUTH replies
    pub client: ClientSettings,

    /// Slot restart and status reporting
    pub supervisor: SupervisorSettings,

    /// Current environment (development, production)
    pub environment: String,
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Candidate WebSocket endpoints; bare `host:port` implies `wss://`
    pub endpoints: Vec<String>,

    /// IP-echo URL used to verify proxies
    pub ip_check_url: String,
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Delay before the first reconnect (default: 2000)
    pub retry_interval_ms: u64,

    /// Cap for the doubled reconnect delay (default: 2000, i.e. fixed)
    pub max_retry_interval_ms: u64,

    /// Delay between a PONG and the next PING (default: 26000)
    pub ping_interval_ms: u64,

    /// Inbound silence that forces a reconnect (default: 90)
    pub stale_threshold_secs: u64,

    /// Staleness check granularity (default: 1000)
    pub monitor_tick_ms: u64,

    /// Consecutive failures before a slot gives up; 0 means never (default: 25)
    pub max_consecutive_failures: u32,

    /// Whether failed proxy probes count toward the ceiling (default: true)
    pub count_proxy_failures: bool,

    /// Upper bound on dial + handshake in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

/// Where session proxies come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxySource {
    /// One slot per line of `proxy.filename`
    Custom,
    /// A single direct slot
    None,
}

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    pub source: ProxySource,

    /// Proxy list path (default: proxy.txt)
    pub filename: String,

    /// Probe each proxy before every connection attempt
    pub verify: bool,

    /// Probe timeout in seconds (default: 15)
    pub verify_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySettings {
    pub user_id: String,
}

/// Client fingerprint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub user_agent: String,
    pub device_type: String,
    pub extension_version: String,
    pub ping_version: String,

    /// Headers sent with the WebSocket upgrade request
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

/// Supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSettings {
    /// Restart slots that gave up (default: false)
    pub restart_on_failure: bool,

    /// Delay before restarting a failed slot in seconds (default: 60)
    pub restart_delay_secs: u64,

    /// Interval between status summaries in seconds (default: 60)
    pub status_interval_secs: u64,
}

fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:92.0) Gecko/20100101 Firefox/92.0",
        ),
        ("Pragma", "no-cache"),
        ("Accept-Language", "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("Cache-Control", "no-cache"),
        ("OS", "Windows"),
        ("Platform", "Desktop"),
        ("Browser", "Mozilla"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. Built-in defaults
    /// 2. config/default.toml (base configuration)
    /// 3. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 4. `APP__SECTION__KEY` environment variables
    /// 5. `USER_ID`, `PROXY_FILE`, `PROXY_SOURCE`, `WSS_HOSTS`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if it fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__SESSION__PING_INTERVAL_MS=30000 -> session.ping_interval_ms
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.endpoints")
                    .try_parsing(true),
            )
            .set_override_option("identity.user_id", std::env::var("USER_ID").ok())?
            .set_override_option("proxy.filename", std::env::var("PROXY_FILE").ok())?
            .set_override_option("proxy.source", std::env::var("PROXY_SOURCE").ok())?
            .set_override_option(
                "server.endpoints",
                std::env::var("WSS_HOSTS").ok().map(|hosts| split_list(&hosts)),
            )?
            .build()?
            .try_deserialize()
            .and_then(Self::validated)
    }

    /// Defaults only, for embedding and tests.
    pub fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("server.endpoints", vec!["proxy.wynd.network:4444"])?
            .set_default("server.ip_check_url", "https://ipinfo.io/json")?
            .set_default("session.retry_interval_ms", 2000_i64)?
            .set_default("session.max_retry_interval_ms", 2000_i64)?
            .set_default("session.ping_interval_ms", 26000_i64)?
            .set_default("session.stale_threshold_secs", 90_i64)?
            .set_default("session.monitor_tick_ms", 1000_i64)?
            .set_default("session.max_consecutive_failures", 25_i64)?
            .set_default("session.count_proxy_failures", true)?
            .set_default("session.connect_timeout_secs", 30_i64)?
            .set_default("proxy.source", "custom")?
            .set_default("proxy.filename", "proxy.txt")?
            .set_default("proxy.verify", true)?
            .set_default("proxy.verify_timeout_secs", 15_i64)?
            .set_default("client.user_agent", "Mozilla/5.0")?
            .set_default("client.device_type", "desktop")?
            .set_default("client.extension_version", "4.28.2")?
            .set_default("client.ping_version", "1.0.0")?
            .set_default("supervisor.restart_on_failure", false)?
            .set_default("supervisor.restart_delay_secs", 60_i64)?
            .set_default("supervisor.status_interval_secs", 60_i64)
    }

    /// Reject settings that would make sessions misbehave.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.identity()?;
        self.endpoints()?;

        let session = &self.session;
        for (name, value) in [
            ("session.retry_interval_ms", session.retry_interval_ms),
            ("session.ping_interval_ms", session.ping_interval_ms),
            ("session.stale_threshold_secs", session.stale_threshold_secs),
            ("session.monitor_tick_ms", session.monitor_tick_ms),
            ("session.connect_timeout_secs", session.connect_timeout_secs),
            ("supervisor.status_interval_secs", self.supervisor.status_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be positive", name)));
            }
        }

        if Duration::from_secs(session.stale_threshold_secs)
            <= Duration::from_millis(session.ping_interval_ms)
        {
            return Err(ConfigError::Message(format!(
                "session.stale_threshold_secs ({}s) must exceed the ping interval ({}ms)",
                session.stale_threshold_secs, session.ping_interval_ms
            )));
        }
        Ok(self)
    }

    pub fn identity(&self) -> Result<Identity, ConfigError> {
        Identity::new(&self.identity.user_id)
            .map_err(|_| ConfigError::Message("identity.user_id (USER_ID) must be set".into()))
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        if self.server.endpoints.is_empty() {
            return Err(ConfigError::Message("server.endpoints must not be empty".into()));
        }
        self.server
            .endpoints
            .iter()
            .map(|raw| Endpoint::parse(raw).map_err(|e| ConfigError::Message(e.to_string())))
            .collect()
    }

    /// Everything a session controller needs.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let session = &self.session;
        Ok(ControllerConfig {
            endpoints: self.endpoints()?,
            headers: ConnectionHeaders::new(self.client.headers.clone()),
            profile: ClientProfile {
                user_agent: self.client.user_agent.clone(),
                device_type: self.client.device_type.clone(),
                extension_version: self.client.extension_version.clone(),
                ping_version: self.client.ping_version.clone(),
            },
            heartbeat: HeartbeatPolicy {
                ping_interval: Duration::from_millis(session.ping_interval_ms),
                stale_threshold: Duration::from_secs(session.stale_threshold_secs),
                check_interval: Duration::from_millis(session.monitor_tick_ms),
            },
            reconnect: ReconnectPolicy {
                interval: Duration::from_millis(session.retry_interval_ms),
                max_interval: Duration::from_millis(session.max_retry_interval_ms),
                max_consecutive_failures: (session.max_consecutive_failures > 0)
                    .then_some(session.max_consecutive_failures),
                count_proxy_failures: session.count_proxy_failures,
            },
            verify_proxy: self.proxy.verify,
            connect_timeout: Duration::from_secs(session.connect_timeout_secs),
        })
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        if self.supervisor.restart_on_failure {
            RestartPolicy::After(Duration::from_secs(self.supervisor.restart_delay_secs))
        } else {
            RestartPolicy::Never
        }
    }
}

impl ProxySettings {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

impl SupervisorSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings_with(overrides: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut builder = Settings::builder("test")?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        builder.build()?.try_deserialize::<Settings>()?.validated()
    }

    #[test]
    fn test_defaults() {
        let settings = settings_with(&[("identity.user_id", "user-1")]).unwrap();
        let config = settings.controller_config().unwrap();

        assert_eq!(config.endpoints[0].url().as_str(), "wss://proxy.wynd.network:4444/");
        assert_eq!(config.heartbeat, HeartbeatPolicy::default());
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.profile, ClientProfile::default());
        assert_eq!(config.headers.len(), 7);
        assert!(config.verify_proxy);
        assert_eq!(settings.proxy.source, ProxySource::Custom);
        assert_eq!(settings.restart_policy(), RestartPolicy::Never);
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let err = settings_with(&[("identity.user_id", "  ")]).unwrap_err();
        assert!(err.to_string().contains("USER_ID"));
    }

    #[test]
    fn test_zero_ceiling_means_unlimited() {
        let settings = settings_with(&[
            ("identity.user_id", "user-1"),
            ("session.max_consecutive_failures", "0"),
        ])
        .unwrap();
        let config = settings.controller_config().unwrap();
        assert_eq!(config.reconnect.max_consecutive_failures, None);
    }

    #[test]
    fn test_stale_threshold_must_exceed_ping_interval() {
        let err = settings_with(&[
            ("identity.user_id", "user-1"),
            ("session.stale_threshold_secs", "20"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("stale_threshold_secs"));
    }

    #[test]
    fn test_huge_stale_threshold_is_accepted() {
        let huge = u64::MAX.to_string();
        let settings = settings_with(&[
            ("identity.user_id", "user-1"),
            ("session.stale_threshold_secs", huge.as_str()),
        ])
        .unwrap();
        assert_eq!(settings.session.stale_threshold_secs, u64::MAX);
    }

    #[test]
    fn test_restart_policy() {
        let settings = settings_with(&[
            ("identity.user_id", "user-1"),
            ("supervisor.restart_on_failure", "true"),
            ("supervisor.restart_delay_secs", "5"),
        ])
        .unwrap();
        assert_eq!(
            settings.restart_policy(),
            RestartPolicy::After(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_split_host_list() {
        assert_eq!(
            split_list("a.example.com:4444, b.example.com:4444,,"),
            vec!["a.example.com:4444", "b.example.com:4444"]
        );
    }
}
