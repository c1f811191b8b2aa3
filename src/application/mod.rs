//! Application Layer
//!
//! Session lifecycle orchestration: per-identity controllers, their
//! heartbeat monitors and generation-scoped timers, and the supervisor
//! that runs one controller per proxy binding.

pub mod controller;
pub mod heartbeat;
pub mod supervisor;
pub mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    ControllerConfig, ControllerHandle, ControllerStatus, Lifecycle, ReconnectPolicy,
    SessionController,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPolicy, Liveness};
pub use supervisor::{RestartPolicy, Supervisor, SupervisorSummary};
pub use timers::{TimerFactory, TimerFired, TimerHandle, TimerKind};
