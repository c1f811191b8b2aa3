//! # Session Keeper Library
//!
//! Keeps long-lived, authenticated WebSocket sessions alive on behalf of
//! one identity, optionally tunneling each session through its own proxy:
//! - AUTH challenge/response and PING/PONG heartbeats
//! - Staleness detection and reconnect with the same identity and proxy
//! - SOCKS5 and HTTP CONNECT tunnels, proxy reachability probes
//!
//! ## Architecture
//!
//! - **Domain Layer**: identities, proxy descriptors, session state, and the
//!   transport/resolver seams
//! - **Protocol**: wire messages exchanged with the server
//! - **Application Layer**: session controllers, heartbeat monitors, timers
//!   and the supervisor
//! - **Infrastructure Layer**: WebSocket connector, proxy tunnels and probes
//!
//! ## Module Structure
//!
//! ```text
//! session_keeper/
//! +-- config/         Configuration management
//! +-- domain/         Domain types and traits
//! +-- protocol/       AUTH / PING / PONG messages
//! +-- application/    Controllers, supervisor, timers
//! +-- infrastructure/ WebSocket and proxy implementations
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer - Core types and seams
pub mod domain;

// Wire protocol
pub mod protocol;

// Application layer - Session lifecycle
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Application startup
pub mod startup;

// Telemetry and observability
pub mod telemetry;
