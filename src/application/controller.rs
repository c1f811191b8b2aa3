//! Session Controller
//!
//! Owns one identity's connection lifecycle:
//!
//! ```text
//! verify proxy -> open transport -> AUTH -> PING/PONG ... -> close/error/stale
//!      ^                                                          |
//!      +------------------- backoff, same identity + proxy -------+
//! ```
//!
//! Each controller runs on its own task. Transport events, timer callbacks
//! and stop requests are serialized through one `select!` loop, so no
//! session state is shared or locked. Every timer is tagged with the
//! transport generation it was armed for and is canceled when that
//! generation ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use super::heartbeat::{HeartbeatMonitor, HeartbeatPolicy, Liveness};
use super::timers::{TimerFactory, TimerFired, TimerHandle, TimerKind};
use crate::domain::{
    ConnectionHeaders, ConnectionState, Connector, EgressInfo, Endpoint, Identity, ProxyBinding,
    ProxyDescriptor, ProxyResolver, Session, TransportEvent, TransportHandle, ABNORMAL_CLOSURE,
};
use crate::protocol::{Action, AuthResponse, ClientProfile, Inbound, PingMessage};
use crate::shared::error::{SessionError, TransportError};

/// Upper bound on waiting for the server's close frame after `stop()`.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reconnect delay and failure ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub interval: Duration,
    /// Cap for the doubled delay; equal to `interval` for a fixed delay
    pub max_interval: Duration,
    /// Give up after this many consecutive failures; `None` retries forever
    pub max_consecutive_failures: Option<u32>,
    /// Whether failed proxy verifications count toward the ceiling
    pub count_proxy_failures: bool,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let cap = self.max_interval.max(self.interval);
        self.interval.saturating_mul(1 << exponent).min(cap)
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|ceiling| failures >= ceiling)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(2),
            max_consecutive_failures: Some(25),
            count_proxy_failures: true,
        }
    }
}

/// Everything a controller needs besides its identity and proxy.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Candidate endpoints, one picked uniformly at random per attempt
    pub endpoints: Vec<Endpoint>,
    pub headers: ConnectionHeaders,
    pub profile: ClientProfile,
    pub heartbeat: HeartbeatPolicy,
    pub reconnect: ReconnectPolicy,
    /// Probe the proxy before every attempt
    pub verify_proxy: bool,
    pub connect_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            headers: ConnectionHeaders::default(),
            profile: ClientProfile::default(),
            heartbeat: HeartbeatPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            verify_proxy: true,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn pick_endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.choose(&mut rand::rng())
    }
}

/// Whether a controller is still working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Running,
    Stopped,
    Failed,
}

/// Observable snapshot of a controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    /// Proxy (redacted) or `direct`
    pub slot: String,
    pub lifecycle: Lifecycle,
    pub state: ConnectionState,
    /// Current transport generation, 0 before the first attempt
    pub generation: u64,
    pub consecutive_failures: u32,
    /// Timers armed and not yet fired or canceled
    pub armed_timers: usize,
    pub browser_id: Option<Uuid>,
    pub egress: Option<EgressInfo>,
    pub last_error: Option<String>,
}

impl ControllerStatus {
    fn new(slot: String) -> Self {
        Self {
            slot,
            lifecycle: Lifecycle::Running,
            state: ConnectionState::Connecting,
            generation: 0,
            consecutive_failures: 0,
            armed_timers: 0,
            browser_id: None,
            egress: None,
            last_error: None,
        }
    }
}

/// Handle to a running controller.
pub struct ControllerHandle {
    cancel: CancellationToken,
    status: watch::Receiver<ControllerStatus>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl ControllerHandle {
    /// Request graceful shutdown. No effect once the controller has ended.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the controller to end.
    ///
    /// Resolves to `Ok(())` after `stop()` and to
    /// `Err(SessionError::PermanentFailure)` after the failure ceiling.
    pub async fn join(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

/// Drives one logical session slot.
pub struct SessionController {
    config: Arc<ControllerConfig>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ProxyResolver>,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(
        config: Arc<ControllerConfig>,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn ProxyResolver>,
    ) -> Self {
        Self {
            config,
            connector,
            resolver,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` for stop requests, typically a child of a supervisor token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Begin the connect/auth/heartbeat/reconnect cycle.
    pub fn start(self, identity: Identity, proxy: Option<ProxyDescriptor>) -> ControllerHandle {
        let slot = proxy
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "direct".to_string());

        let (timers, timer_rx) = TimerFactory::new();
        let (status_tx, status_rx) = watch::channel(ControllerStatus::new(slot.clone()));

        let session_loop = SessionLoop {
            identity,
            proxy,
            config: self.config,
            connector: self.connector,
            resolver: self.resolver,
            cancel: self.cancel.clone(),
            timers,
            timer_rx,
            status: status_tx,
            generation: 0,
            consecutive_failures: 0,
        };

        let task = tokio::spawn(
            session_loop
                .run()
                .instrument(info_span!("session", slot = %slot)),
        );

        ControllerHandle {
            cancel: self.cancel,
            status: status_rx,
            task,
        }
    }
}

/// How one transport generation ended.
#[derive(Debug)]
enum Ending {
    Stopped,
    Closed { code: u16, reason: String },
    Failed(SessionError),
}

/// Resources bound to one transport generation.
struct LiveSession {
    session: Session,
    transport: TransportHandle,
    monitor: HeartbeatMonitor,
    ping_timer: Option<TimerHandle>,
}

impl LiveSession {
    fn generation(&self) -> u64 {
        self.session.generation
    }
}

struct SessionLoop {
    identity: Identity,
    proxy: Option<ProxyDescriptor>,
    config: Arc<ControllerConfig>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ProxyResolver>,
    cancel: CancellationToken,
    timers: TimerFactory,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    status: watch::Sender<ControllerStatus>,
    generation: u64,
    consecutive_failures: u32,
}

impl SessionLoop {
    async fn run(mut self) -> Result<(), SessionError> {
        info!(identity = %self.identity, "Session controller started");

        while !self.cancel.is_cancelled() {
            let ending = self.attempt().await;

            let (counts, last_error) = match ending {
                Ending::Stopped => break,
                Ending::Closed { code, reason } => {
                    info!(code, reason = %reason, "Connection closed");
                    (true, format!("closed with code {}: {}", code, reason))
                }
                Ending::Failed(err) => {
                    warn!(error = %err, "Connection attempt failed");
                    let counts = !matches!(err, SessionError::ProxyUnreachable(_))
                        || self.config.reconnect.count_proxy_failures;
                    (counts, err.to_string())
                }
            };

            if counts {
                self.consecutive_failures += 1;
            }
            let failures = self.consecutive_failures;
            self.publish(|s| {
                s.state = ConnectionState::Closed;
                s.consecutive_failures = failures;
                s.last_error = Some(last_error.clone());
            });

            if self.config.reconnect.is_exhausted(failures) {
                error!(failures, last_error = %last_error, "Failure ceiling reached, giving up");
                self.publish(|s| s.lifecycle = Lifecycle::Failed);
                return Err(SessionError::PermanentFailure {
                    failures,
                    last_error,
                });
            }

            let delay = self.config.reconnect.delay_for(failures);
            info!(
                delay_ms = delay.as_millis() as u64,
                failures,
                "Reconnecting"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.publish(|s| {
            s.lifecycle = Lifecycle::Stopped;
            s.state = ConnectionState::Closed;
        });
        info!("Session controller stopped");
        Ok(())
    }

    /// One transport generation, from proxy verification to teardown.
    async fn attempt(&mut self) -> Ending {
        self.generation += 1;
        let generation = self.generation;
        self.publish(|s| {
            s.generation = generation;
            s.state = ConnectionState::Connecting;
            s.browser_id = None;
        });
        debug!(generation, "Starting connection attempt");

        let binding = match self.bind_proxy().await {
            Ok(binding) => binding,
            Err(ending) => return ending,
        };

        let Some(endpoint) = self.config.pick_endpoint().cloned() else {
            return Ending::Failed(SessionError::Transport(TransportError::InvalidEndpoint {
                endpoint: String::new(),
                reason: "no endpoints configured".into(),
            }));
        };

        let connect_timeout = self.config.connect_timeout;
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Ending::Stopped,
            result = timeout(
                connect_timeout,
                self.connector.open(&endpoint, binding.as_ref(), &self.config.headers),
            ) => result,
        };

        let transport = match opened {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Ending::Failed(e.into()),
            Err(_) => {
                return Ending::Failed(SessionError::Transport(TransportError::Timeout(
                    connect_timeout,
                )))
            }
        };
        debug!(endpoint = %endpoint, generation, "Transport established");

        let mut live = LiveSession {
            session: Session::new(generation, Instant::now()),
            transport,
            monitor: HeartbeatMonitor::new(&self.config.heartbeat),
            ping_timer: None,
        };

        let ending = self.drive(&mut live).await;
        self.release(&mut live, &ending).await;
        ending
    }

    /// Verify the bound proxy, if any. A failed probe defers this round.
    async fn bind_proxy(&mut self) -> Result<Option<ProxyBinding>, Ending> {
        let Some(descriptor) = self.proxy.clone() else {
            return Ok(None);
        };

        if !self.config.verify_proxy {
            return Ok(Some(ProxyBinding::unverified(descriptor)));
        }

        let verified = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Ending::Stopped),
            result = self.resolver.verify(&descriptor) => result,
        };

        match verified {
            Ok(egress) => {
                info!(
                    ip = %egress.ip,
                    country = egress.country.as_deref().unwrap_or("?"),
                    "Proxy verified"
                );
                let published = egress.clone();
                self.publish(|s| s.egress = Some(published));
                Ok(Some(ProxyBinding::verified(descriptor, egress)))
            }
            Err(e) => Err(Ending::Failed(SessionError::ProxyUnreachable(e))),
        }
    }

    /// Event loop for one live transport.
    async fn drive(&mut self, live: &mut LiveSession) -> Ending {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ending::Stopped,

                event = live.transport.next_event() => {
                    let Some(event) = event else {
                        return Ending::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "transport dropped".into(),
                        };
                    };
                    if let Some(ending) = self.on_event(live, event) {
                        return ending;
                    }
                }

                Some(fired) = self.timer_rx.recv() => {
                    if let Some(ending) = self.on_timer(live, fired) {
                        return ending;
                    }
                }
            }
        }
    }

    fn on_event(&mut self, live: &mut LiveSession, event: TransportEvent) -> Option<Ending> {
        match event {
            TransportEvent::Opened => {
                live.session.mark_open(Instant::now());
                live.monitor.start(&self.timers, live.generation());
                info!(generation = live.generation(), "Connected, awaiting auth challenge");
                self.publish(|s| s.state = ConnectionState::AwaitingAuth);
                None
            }
            TransportEvent::Message(bytes) => self.on_message(live, &bytes).err().map(Ending::Failed),
            TransportEvent::Activity => {
                live.session.touch_inbound(Instant::now());
                None
            }
            TransportEvent::Closed { code, reason } => Some(Ending::Closed { code, reason }),
            TransportEvent::Error(detail) => Some(Ending::Failed(SessionError::Transport(
                TransportError::Socket(detail),
            ))),
        }
    }

    /// Dispatch one inbound message. Only transport failures are returned;
    /// protocol problems are logged and the message is dropped.
    fn on_message(&mut self, live: &mut LiveSession, bytes: &[u8]) -> Result<(), SessionError> {
        let now = Instant::now();
        live.session.touch_inbound(now);

        let message = match Inbound::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                let err = SessionError::from(e);
                warn!(error = %err, "Ignoring malformed message");
                return Ok(());
            }
        };
        trace!(action = ?message.action, id = ?message.id, "Received message");

        match &message.action {
            Some(Action::Auth) => self.on_auth_challenge(live, message.id.as_deref()),
            Some(Action::Pong) => {
                self.on_heartbeat_ack(live, now);
                Ok(())
            }
            Some(Action::Other(name)) => {
                debug!(action = %name, "Ignoring unknown action");
                Ok(())
            }
            None => {
                debug!("Ignoring message without action");
                Ok(())
            }
        }
    }

    fn on_auth_challenge(
        &mut self,
        live: &mut LiveSession,
        challenge_id: Option<&str>,
    ) -> Result<(), SessionError> {
        let Some(challenge_id) = challenge_id else {
            let err = SessionError::Protocol("AUTH challenge without id".into());
            warn!(error = %err, "Ignoring auth challenge");
            return Ok(());
        };

        let browser_id = Uuid::new_v4();
        let response = AuthResponse::new(
            challenge_id,
            browser_id,
            &self.identity,
            &self.config.profile,
            Utc::now().timestamp(),
        );
        live.transport.send(serde_json::to_string(&response)?)?;
        live.session.authenticate(browser_id);
        self.consecutive_failures = 0;

        info!(
            browser_id = %browser_id,
            generation = live.generation(),
            "Authenticated"
        );
        self.publish(|s| {
            s.state = ConnectionState::Authenticated;
            s.consecutive_failures = 0;
            s.browser_id = Some(browser_id);
            s.last_error = None;
        });

        // First ping goes out right after the auth response; later ones
        // are driven by acknowledgments.
        if !live.session.heartbeat_started {
            self.send_ping(live)?;
        }
        Ok(())
    }

    fn on_heartbeat_ack(&mut self, live: &mut LiveSession, now: Instant) {
        if !live.session.is_authenticated() {
            debug!("Heartbeat ack before authentication, ignoring");
            return;
        }

        if let Some(mut previous) = live.ping_timer.take() {
            previous.cancel();
        }
        live.ping_timer = Some(self.timers.once(
            live.generation(),
            TimerKind::Heartbeat,
            self.config.heartbeat.ping_interval,
        ));
        self.publish(|_| {});

        let rtt_ms = live
            .session
            .last_ping_sent_at
            .map(|sent| now.saturating_duration_since(sent).as_millis() as u64);
        trace!(rtt_ms = ?rtt_ms, "Heartbeat acknowledged, next ping scheduled");
    }

    fn on_timer(&mut self, live: &mut LiveSession, fired: TimerFired) -> Option<Ending> {
        if fired.generation != live.generation() {
            trace!(
                fired = fired.generation,
                current = live.generation(),
                "Discarding timer from a superseded generation"
            );
            return None;
        }

        match fired.kind {
            TimerKind::Heartbeat => {
                live.ping_timer = None;
                self.send_ping(live).err().map(Ending::Failed)
            }
            TimerKind::StaleCheck => {
                match live.monitor.check(live.session.last_inbound_at, Instant::now()) {
                    Liveness::Alive => None,
                    Liveness::Stale { silent_for } => {
                        warn!(
                            silent_secs = silent_for.as_secs(),
                            "No inbound traffic, forcing reconnect"
                        );
                        Some(Ending::Failed(SessionError::StaleConnection(silent_for)))
                    }
                }
            }
        }
    }

    fn send_ping(&mut self, live: &mut LiveSession) -> Result<(), SessionError> {
        let ping = PingMessage::new(&self.config.profile);
        live.transport.send(serde_json::to_string(&ping)?)?;
        live.session.record_ping(Instant::now());
        debug!(ping_id = %ping.id, "Sent ping");
        Ok(())
    }

    /// Tear down a generation: cancel its timers, then close or terminate
    /// the transport. Runs at most once per generation.
    async fn release(&mut self, live: &mut LiveSession, ending: &Ending) {
        if !live.session.begin_close() {
            return;
        }
        self.publish(|s| s.state = ConnectionState::Closing);

        if let Some(mut ping_timer) = live.ping_timer.take() {
            ping_timer.cancel();
        }
        live.monitor.cancel();

        if matches!(ending, Ending::Stopped) && live.transport.is_open() {
            live.transport.close();
            let drained = timeout(GRACEFUL_CLOSE_TIMEOUT, async {
                while let Some(event) = live.transport.next_event().await {
                    if event.is_terminal() {
                        break;
                    }
                }
            })
            .await;
            if drained.is_err() {
                debug!("Close handshake timed out");
            }
        }
        live.transport.terminate();

        live.session.mark_closed();
        self.publish(|s| s.state = ConnectionState::Closed);
        debug!(
            generation = live.generation(),
            armed_timers = self.timers.armed(),
            "Generation released"
        );
    }

    fn publish(&self, update: impl FnOnce(&mut ControllerStatus)) {
        let armed = self.timers.armed();
        self.status.send_modify(|status| {
            update(status);
            status.armed_timers = armed;
        });
    }
}
