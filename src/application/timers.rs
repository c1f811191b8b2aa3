//! Generation-scoped timers.
//!
//! Every timer is armed against a transport generation and delivers a
//! [`TimerFired`] into the controller's mailbox. Handles are explicitly
//! cancelable; the controller discards fired events whose generation is no
//! longer current.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Send the next heartbeat ping
    Heartbeat,
    /// Periodic staleness check
    StaleCheck,
}

/// Delivered to the controller when a timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub generation: u64,
    pub kind: TimerKind,
}

/// Arms timers that report into one controller mailbox.
#[derive(Clone)]
pub struct TimerFactory {
    tx: mpsc::UnboundedSender<TimerFired>,
    armed: Arc<AtomicUsize>,
}

impl TimerFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Self {
            tx,
            armed: Arc::new(AtomicUsize::new(0)),
        };
        (factory, rx)
    }

    /// Fire once after `delay`.
    pub fn once(&self, generation: u64, kind: TimerKind, delay: Duration) -> TimerHandle {
        let live = self.arm();
        let fired = TimerFired { generation, kind };
        let tx = self.tx.clone();
        let armed = self.armed.clone();
        let task_live = live.clone();

        let task = tokio::spawn(async move {
            sleep(delay).await;
            if task_live.swap(false, Ordering::AcqRel) {
                armed.fetch_sub(1, Ordering::AcqRel);
                let _ = tx.send(fired);
            }
        });

        TimerHandle {
            live,
            armed: self.armed.clone(),
            task,
        }
    }

    /// Fire every `period`, first tick one period from now.
    pub fn every(&self, generation: u64, kind: TimerKind, period: Duration) -> TimerHandle {
        let live = self.arm();
        let fired = TimerFired { generation, kind };
        let tx = self.tx.clone();
        let task_live = live.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !task_live.load(Ordering::Acquire) || tx.send(fired).is_err() {
                    break;
                }
            }
        });

        TimerHandle {
            live,
            armed: self.armed.clone(),
            task,
        }
    }

    /// Timers armed and not yet fired (one-shot) or canceled.
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::Acquire)
    }

    fn arm(&self) -> Arc<AtomicBool> {
        self.armed.fetch_add(1, Ordering::AcqRel);
        Arc::new(AtomicBool::new(true))
    }
}

/// Cancelable handle to an armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    live: Arc<AtomicBool>,
    armed: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn is_armed(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Cancel the timer. Returns `true` if it was still armed.
    pub fn cancel(&mut self) -> bool {
        self.task.abort();
        if self.live.swap(false, Ordering::AcqRel) {
            self.armed.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
