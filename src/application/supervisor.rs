//! Session Supervisor
//!
//! Runs one [`SessionController`] per proxy binding for an identity and
//! aggregates their statuses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::controller::{
    ControllerConfig, ControllerHandle, ControllerStatus, Lifecycle, SessionController,
};
use crate::domain::{ConnectionState, Connector, Identity, ProxyDescriptor, ProxyResolver};

/// What to do with a slot whose controller gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    After(Duration),
}

/// Slot counts by coarse state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorSummary {
    pub total: usize,
    pub authenticated: usize,
    pub connecting: usize,
    pub failed: usize,
    pub stopped: usize,
}

pub struct Supervisor {
    config: Arc<ControllerConfig>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ProxyResolver>,
    restart: RestartPolicy,
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// Latest status feed per slot, kept after the controller ends
    slots: Arc<DashMap<usize, watch::Receiver<ControllerStatus>>>,
    next_slot: AtomicUsize,
}

impl Supervisor {
    pub fn new(
        config: Arc<ControllerConfig>,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn ProxyResolver>,
    ) -> Self {
        Self {
            config,
            connector,
            resolver,
            restart: RestartPolicy::Never,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            slots: Arc::new(DashMap::new()),
            next_slot: AtomicUsize::new(0),
        }
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Start one controller per binding; `None` connects directly.
    pub fn spawn(&self, identity: &Identity, bindings: Vec<Option<ProxyDescriptor>>) {
        for proxy in bindings {
            let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
            let runner = SlotRunner {
                slot,
                identity: identity.clone(),
                proxy,
                config: self.config.clone(),
                connector: self.connector.clone(),
                resolver: self.resolver.clone(),
                restart: self.restart,
                cancel: self.cancel.clone(),
                slots: self.slots.clone(),
            };
            let handle = runner.start();
            self.tracker.spawn(runner.run(handle));
        }
        info!(slots = self.slot_count(), "Session slots spawned");
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of every slot, ordered by slot number.
    pub fn statuses(&self) -> Vec<ControllerStatus> {
        let mut entries: Vec<(usize, ControllerStatus)> = self
            .slots
            .iter()
            .map(|entry| (*entry.key(), entry.value().borrow().clone()))
            .collect();
        entries.sort_by_key(|(slot, _)| *slot);
        entries.into_iter().map(|(_, status)| status).collect()
    }

    pub fn summary(&self) -> SupervisorSummary {
        let mut summary = SupervisorSummary::default();
        for entry in self.slots.iter() {
            let status = entry.value().borrow();
            summary.total += 1;
            match (status.lifecycle, status.state) {
                (Lifecycle::Failed, _) => summary.failed += 1,
                (Lifecycle::Stopped, _) => summary.stopped += 1,
                (Lifecycle::Running, ConnectionState::Authenticated) => summary.authenticated += 1,
                (Lifecycle::Running, _) => summary.connecting += 1,
            }
        }
        summary
    }

    /// Wait until every slot has ended on its own.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Stop every slot and wait for them to finish.
    pub async fn shutdown(&self) {
        info!(slots = self.slot_count(), "Shutting down session slots");
        self.cancel.cancel();
        self.wait().await;
    }
}

struct SlotRunner {
    slot: usize,
    identity: Identity,
    proxy: Option<ProxyDescriptor>,
    config: Arc<ControllerConfig>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ProxyResolver>,
    restart: RestartPolicy,
    cancel: CancellationToken,
    slots: Arc<DashMap<usize, watch::Receiver<ControllerStatus>>>,
}

impl SlotRunner {
    /// Start a fresh controller and publish its status feed for the slot.
    fn start(&self) -> ControllerHandle {
        let handle = SessionController::new(
            self.config.clone(),
            self.connector.clone(),
            self.resolver.clone(),
        )
        .with_cancellation(self.cancel.child_token())
        .start(self.identity.clone(), self.proxy.clone());
        self.slots.insert(self.slot, handle.subscribe());
        handle
    }

    async fn run(self, mut handle: ControllerHandle) {
        loop {
            let err = match handle.join().await {
                Ok(()) => return,
                Err(err) => err,
            };

            let RestartPolicy::After(delay) = self.restart else {
                warn!(slot = self.slot, error = %err, "Slot failed permanently");
                return;
            };

            info!(
                slot = self.slot,
                error = %err,
                delay_secs = delay.as_secs(),
                "Slot failed, restarting later"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            handle = self.start();
        }
    }
}
