//! Heartbeat and command handling
//!
//! Runs on its own task. Lifecycle and message notifications arrive through
//! an unbounded channel fed by the connection observer, so the attempt loop
//! is never blocked by protocol work.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::message::{extract_value, identity_report, value_frame};
use crate::config::ProtocolConfig;
use crate::connection::{ConnectionManager, ConnectionObserver, ConnectionState, SendOutcome};
use crate::identity::{normalize_token, IdentitySource};
use crate::metrics::METRICS;
use crate::power::PowerControl;

/// Liveness indicator, independent of the transport-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Indicator {
    /// Not connected
    Idle,
    /// Connected and acknowledged within the watchdog window
    AwaitingAck,
    /// Connected, but no acknowledgment within the watchdog window
    Stale,
}

impl Indicator {
    /// The local "connected" flag
    pub fn is_connected(self) -> bool {
        self == Indicator::AwaitingAck
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Indicator::Idle => "idle",
            Indicator::AwaitingAck => "awaiting-ack",
            Indicator::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// Where outbound frames go
pub trait OutboundSink: Send + Sync {
    fn send_frame(&self, payload: String) -> SendOutcome;
}

impl OutboundSink for ConnectionManager {
    fn send_frame(&self, payload: String) -> SendOutcome {
        self.send(payload)
    }
}

/// Protocol timing and sentinels
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub ack_value: String,
    pub keepalive_value: String,
    pub keepalive_interval: Option<Duration>,
    pub identity_interval: Duration,
    pub watchdog_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for HandlerSettings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            ack_value: config.ack_value.clone(),
            keepalive_value: config.keepalive_value.clone(),
            keepalive_interval: config.keepalive_interval(),
            identity_interval: config.identity_interval(),
            watchdog_timeout: config.watchdog_timeout(),
        }
    }
}

#[derive(Debug)]
enum Event {
    State(ConnectionState),
    Message(String),
}

/// Forwards notifications from the attempt loop to the handler task
struct EventForwarder {
    tx: mpsc::UnboundedSender<Event>,
}

impl ConnectionObserver for EventForwarder {
    fn on_state_change(&self, state: ConnectionState) {
        let _ = self.tx.send(Event::State(state));
    }

    fn on_message(&self, message: &str) {
        let _ = self.tx.send(Event::Message(message.to_string()));
    }
}

#[derive(Debug, Default)]
struct Deadlines {
    keepalive: Option<Instant>,
    identity: Option<Instant>,
    watchdog: Option<Instant>,
}

/// Application protocol on top of the connection manager
pub struct ProtocolHandler {
    settings: HandlerSettings,
    outbound: Arc<dyn OutboundSink>,
    identity: Arc<dyn IdentitySource>,
    power: Arc<dyn PowerControl>,
    indicator: watch::Sender<Indicator>,
    deadlines: Deadlines,
}

impl ProtocolHandler {
    pub fn new(
        settings: HandlerSettings,
        outbound: Arc<dyn OutboundSink>,
        identity: Arc<dyn IdentitySource>,
        power: Arc<dyn PowerControl>,
    ) -> Self {
        let (indicator, _) = watch::channel(Indicator::Idle);
        Self {
            settings,
            outbound,
            identity,
            power,
            indicator,
            deadlines: Deadlines::default(),
        }
    }

    /// Start the handler task
    pub fn spawn(self) -> HandlerHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let indicator = self.indicator.subscribe();

        let task = tokio::spawn(self.run(events, shutdown_rx));

        HandlerHandle {
            observer: Arc::new(EventForwarder { tx }),
            indicator,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(Event::State(state)) => self.on_state_change(state),
                    Some(Event::Message(text)) => self.on_message(&text),
                    None => break,
                },
                _ = until(self.deadlines.watchdog) => self.on_watchdog_expired(),
                _ = until(self.deadlines.identity) => self.on_identity_due(),
                _ = until(self.deadlines.keepalive) => self.on_keepalive_due(),
            }
        }

        debug!("Protocol handler stopped");
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                self.send_identity_report();
                let now = Instant::now();
                self.deadlines = Deadlines {
                    keepalive: self.settings.keepalive_interval.map(|interval| now + interval),
                    identity: Some(now + self.settings.identity_interval),
                    watchdog: Some(now + self.settings.watchdog_timeout),
                };
                self.set_indicator(Indicator::AwaitingAck);
            }
            ConnectionState::Disconnected => {
                self.deadlines = Deadlines::default();
                self.set_indicator(Indicator::Idle);
            }
            ConnectionState::Connecting => {}
        }
    }

    fn on_message(&mut self, text: &str) {
        let Some(value) = extract_value(text) else {
            debug!(len = text.len(), "Ignoring message without a value");
            return;
        };

        if value == self.settings.ack_value {
            self.on_ack();
        } else if value == self.settings.keepalive_value {
            trace!("Ignoring echoed keepalive");
        } else if self.matches_local_identity(&value) {
            warn!(token = %value, "Shutdown command received for this host");
            METRICS.command_executed();
            self.power.request_shutdown();
        } else {
            debug!(%value, "Ignoring value not addressed to this host");
        }
    }

    fn on_ack(&mut self) {
        if *self.indicator.borrow() == Indicator::Idle {
            debug!("Ignoring acknowledgment while disconnected");
            return;
        }

        METRICS.ack_received();
        let now = Instant::now();
        self.deadlines.watchdog = Some(now + self.settings.watchdog_timeout);
        self.deadlines.identity = Some(now + self.settings.identity_interval);
        self.set_indicator(Indicator::AwaitingAck);
        trace!("Acknowledgment received");
    }

    fn on_watchdog_expired(&mut self) {
        self.deadlines.watchdog = None;
        if *self.indicator.borrow() != Indicator::AwaitingAck {
            return;
        }

        METRICS.watchdog_expired();
        warn!(
            timeout_secs = self.settings.watchdog_timeout.as_secs(),
            "No acknowledgment within the liveness window"
        );
        self.set_indicator(Indicator::Stale);
    }

    fn on_identity_due(&mut self) {
        self.send_identity_report();
        self.deadlines.identity = Some(Instant::now() + self.settings.identity_interval);
    }

    fn on_keepalive_due(&mut self) {
        let frame = value_frame(&self.settings.keepalive_value);
        if self.outbound.send_frame(frame) == SendOutcome::Ignored {
            trace!("Keepalive dropped, not connected");
        }
        self.deadlines.keepalive = self
            .settings
            .keepalive_interval
            .map(|interval| Instant::now() + interval);
    }

    fn send_identity_report(&self) {
        let interfaces = self.identity.interfaces();
        let report = identity_report(&interfaces);
        match self.outbound.send_frame(report) {
            SendOutcome::Dispatched => {
                debug!(interfaces = interfaces.len(), "Identity report sent")
            }
            SendOutcome::Ignored => trace!("Identity report dropped, not connected"),
        }
    }

    fn matches_local_identity(&self, value: &str) -> bool {
        let wanted = normalize_token(value);
        self.identity
            .tokens()
            .iter()
            .any(|token| normalize_token(token) == wanted)
    }

    fn set_indicator(&self, next: Indicator) {
        let changed = self.indicator.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(indicator = %next, "Liveness indicator changed");
        }
    }
}

/// Handle to a running protocol handler
pub struct HandlerHandle {
    observer: Arc<EventForwarder>,
    indicator: watch::Receiver<Indicator>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HandlerHandle {
    /// Observer to register with the connection manager
    pub fn observer(&self) -> Arc<dyn ConnectionObserver> {
        self.observer.clone()
    }

    /// Subscribe to the liveness indicator
    pub fn indicator(&self) -> watch::Receiver<Indicator> {
        self.indicator.clone()
    }

    /// Stop the handler task and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Protocol handler task failed");
        }
    }
}

/// Resolves once shutdown is requested or the handle is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
