//! Heartbeat Monitor
//!
//! Detects half-open connections: the socket is alive but the server has
//! stopped talking. The monitor ticks for the lifetime of one transport
//! generation and reports [`Liveness::Stale`] once inbound silence exceeds
//! the configured threshold.
//!
//! Staleness is judged by wall-clock silence only. Ping cadence is
//! reply-driven and lives in the controller; the monitor never counts
//! unanswered pings.

use std::time::Duration;

use tokio::time::Instant;

use super::timers::{TimerFactory, TimerHandle, TimerKind};

/// Heartbeat cadence and staleness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Delay between an acknowledgment and the next ping
    pub ping_interval: Duration,
    /// Inbound silence after which the transport is force-closed
    pub stale_threshold: Duration,
    /// Granularity of the staleness check
    pub check_interval: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(26),
            stale_threshold: Duration::from_secs(90),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// Result of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Stale { silent_for: Duration },
}

/// Per-generation staleness watchdog.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    stale_threshold: Duration,
    check_interval: Duration,
    ticker: Option<TimerHandle>,
    cancelled: bool,
}

impl HeartbeatMonitor {
    pub fn new(policy: &HeartbeatPolicy) -> Self {
        Self {
            stale_threshold: policy.stale_threshold,
            check_interval: policy.check_interval,
            ticker: None,
            cancelled: false,
        }
    }

    /// Start ticking for `generation`. A no-op once started or cancelled.
    pub fn start(&mut self, timers: &TimerFactory, generation: u64) {
        if self.ticker.is_some() || self.cancelled {
            return;
        }
        self.ticker = Some(timers.every(generation, TimerKind::StaleCheck, self.check_interval));
    }

    pub fn check(&self, last_inbound_at: Instant, now: Instant) -> Liveness {
        let silent_for = now.saturating_duration_since(last_inbound_at);
        if silent_for > self.stale_threshold {
            Liveness::Stale { silent_for }
        } else {
            Liveness::Alive
        }
    }

    /// Stop ticking. Returns `true` only for the call that actually
    /// cancelled a running ticker.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        match self.ticker.take() {
            Some(mut ticker) => ticker.cancel(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(TimerHandle::is_armed)
    }
}
