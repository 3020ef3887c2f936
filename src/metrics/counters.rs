//! Atomic counters for agent metrics
//!
//! Lock-free counters that can be safely updated from any task.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Connection metrics
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub sessions_established: AtomicU64,

    // Traffic metrics
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub sends_ignored: AtomicU64,

    // Protocol metrics
    pub acks_received: AtomicU64,
    pub commands_executed: AtomicU64,
    pub watchdog_expirations: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            sends_ignored: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            commands_executed: AtomicU64::new(0),
            watchdog_expirations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn session_established(&self) {
        self.sessions_established.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn send_ignored(&self) {
        self.sends_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn command_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn watchdog_expired(&self) {
        self.watchdog_expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            sessions_established: self.sessions_established.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            sends_ignored: self.sends_ignored.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            watchdog_expirations: self.watchdog_expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub sessions_established: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub sends_ignored: u64,
    pub acks_received: u64,
    pub commands_executed: u64,
    pub watchdog_expirations: u64,
}
