//! Session entity: the live unit of work for one transport generation.

use std::fmt;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    AwaitingAuth,
    Authenticated,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-generation session data.
///
/// Mutated only by the owning controller's event handlers.
#[derive(Debug)]
pub struct Session {
    /// Transport generation this session belongs to
    pub generation: u64,

    pub state: ConnectionState,

    /// Most recent inbound message of any kind
    pub last_inbound_at: Instant,

    /// Most recent outbound heartbeat
    pub last_ping_sent_at: Option<Instant>,

    /// Browser identifier sent in the latest auth response
    pub browser_id: Option<Uuid>,

    /// Whether the ping/ack chain has been started for this generation
    pub heartbeat_started: bool,
}

impl Session {
    pub fn new(generation: u64, now: Instant) -> Self {
        Self {
            generation,
            state: ConnectionState::Connecting,
            last_inbound_at: now,
            last_ping_sent_at: None,
            browser_id: None,
            heartbeat_started: false,
        }
    }

    /// Transport reported open; silence is measured from here.
    pub fn mark_open(&mut self, now: Instant) {
        self.state = ConnectionState::AwaitingAuth;
        self.last_inbound_at = now;
    }

    pub fn touch_inbound(&mut self, now: Instant) {
        self.last_inbound_at = now;
    }

    pub fn authenticate(&mut self, browser_id: Uuid) {
        self.state = ConnectionState::Authenticated;
        self.browser_id = Some(browser_id);
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
        self.heartbeat_started = true;
    }

    /// Enter `Closing`. Returns `false` if the session was already closing
    /// or closed, so teardown runs at most once.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            ConnectionState::Closing | ConnectionState::Closed => false,
            _ => {
                self.state = ConnectionState::Closing;
                true
            }
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
