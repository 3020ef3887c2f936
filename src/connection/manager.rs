//! Connection manager
//!
//! Owns the attempt loop around transport sessions: connect, read until the
//! session ends, tear down, wait a fixed backoff, repeat until stopped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::state::{ConnectionObserver, ConnectionState, Lifecycle};
use crate::credentials::Credentials;
use crate::metrics::METRICS;
use crate::transport::{Connector, Endpoint, Received, Session, SessionWriter};

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Fixed delay between attempts
    pub backoff: Duration,
    /// Largest reassembled inbound message
    pub max_message_bytes: usize,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            max_message_bytes: 64 * 1024,
        }
    }
}

/// What happened to a payload handed to [`ConnectionManager::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live session for writing
    Dispatched,
    /// Dropped because no session is connected
    Ignored,
}

/// Running attempt loop
struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Keeps one resilient channel to the control endpoint
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    config: ConnectionManagerConfig,
    lifecycle: Arc<Lifecycle>,
    /// Write half of the live session, shared with `send`
    current: Arc<Mutex<Option<Arc<SessionWriter>>>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        config: ConnectionManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            endpoint,
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            current: Arc::new(Mutex::new(None)),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// Register an observer for state changes and inbound messages
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.lifecycle.add_observer(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.current()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start an attempt loop with `credentials`, first tearing down any
    /// previous loop.
    pub async fn connect(&self, credentials: Credentials) {
        let mut worker = self.worker.lock().await;
        self.stop_worker(&mut worker).await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let attempt_loop = AttemptLoop {
            connector: self.connector.clone(),
            endpoint: self.endpoint.clone(),
            credentials,
            backoff: self.config.backoff,
            max_message_bytes: self.config.max_message_bytes,
            lifecycle: self.lifecycle.clone(),
            current: self.current.clone(),
            stop: stop_rx,
        };

        info!(
            endpoint = %self.endpoint,
            identity_id = %attempt_loop.credentials.identity_id,
            "Starting connection"
        );
        let handle = tokio::spawn(attempt_loop.run());
        *worker = Some(Worker { stop_tx, handle });
    }

    /// Stop the attempt loop and wait until it has fully exited.
    ///
    /// No-op when no loop is running.
    pub async fn disconnect(&self) {
        let mut worker = self.worker.lock().await;
        self.stop_worker(&mut worker).await;
    }

    /// Send one text message if connected; never waits on network I/O.
    ///
    /// Payloads from one caller are written in call order.
    pub fn send(&self, payload: impl Into<String>) -> SendOutcome {
        if self.lifecycle.current() != ConnectionState::Connected {
            METRICS.send_ignored();
            return SendOutcome::Ignored;
        }

        let writer = self.current.lock().clone();
        let Some(writer) = writer else {
            METRICS.send_ignored();
            return SendOutcome::Ignored;
        };

        if writer.send(payload.into()) {
            SendOutcome::Dispatched
        } else {
            METRICS.send_ignored();
            SendOutcome::Ignored
        }
    }

    async fn stop_worker(&self, slot: &mut Option<Worker>) {
        let Some(worker) = slot.take() else {
            return;
        };

        debug!("Stopping attempt loop");
        let _ = worker.stop_tx.send(true);

        // Force-close so a write in flight does not hold the loop up
        let writer = self.current.lock().take();
        if let Some(writer) = writer {
            writer.close().await;
        }

        if let Err(e) = worker.handle.await {
            error!(error = %e, "Attempt loop task failed");
        }

        self.lifecycle.transition(ConnectionState::Disconnected);
        info!("Connection stopped");
    }
}

/// State owned by one attempt-loop task.
///
/// Dropping the manager drops the stop sender, which also ends the loop.
struct AttemptLoop {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    credentials: Credentials,
    backoff: Duration,
    max_message_bytes: usize,
    lifecycle: Arc<Lifecycle>,
    current: Arc<Mutex<Option<Arc<SessionWriter>>>>,
    stop: watch::Receiver<bool>,
}

impl AttemptLoop {
    async fn run(mut self) {
        loop {
            self.lifecycle.transition(ConnectionState::Connecting);
            METRICS.connect_attempt();

            let opened = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => None,
                result = self.connector.open(&self.endpoint, &self.credentials) => Some(result),
            };

            match opened {
                Some(Ok(channel)) => {
                    let session = Session::new(channel, self.max_message_bytes);
                    self.run_session(session).await;
                }
                Some(Err(failure)) => {
                    METRICS.connect_failed();
                    warn!(endpoint = %self.endpoint, reason = failure.reason(), "Connection attempt failed");
                }
                None => debug!("Stop requested while connecting"),
            }

            self.lifecycle.transition(ConnectionState::Disconnected);

            if self.stopping() {
                break;
            }

            debug!(backoff_secs = self.backoff.as_secs_f64(), "Waiting before reconnect");
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }

        debug!("Attempt loop exited");
    }

    /// Publish the session, read until it ends, then tear it down
    async fn run_session(&mut self, mut session: Session) {
        *self.current.lock() = Some(session.writer());
        METRICS.session_established();
        self.lifecycle.transition(ConnectionState::Connected);

        loop {
            let received = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                received = session.receive() => received,
            };

            match received {
                Ok(Received::Message(text)) => {
                    METRICS.message_received();
                    trace!(len = text.len(), "Message received");
                    self.lifecycle.dispatch_message(&text);
                }
                Ok(Received::Closed) => {
                    info!("Session closed by remote");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    break;
                }
            }
        }

        self.current.lock().take();
        session.close().await;
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }
}

/// Resolves once stop is requested or the manager is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
