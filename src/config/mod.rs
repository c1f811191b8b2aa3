//! # Configuration Module
//!
//! This module handles application configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__, plus USER_ID, PROXY_FILE,
//!   PROXY_SOURCE and WSS_HOSTS)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_keeper::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Authenticating as {}", settings.identity.user_id);
//! ```

mod settings;

pub use settings::*;
