//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Counter names paired with their snapshot accessors
const COUNTERS: &[(&str, &str, fn(&MetricsSnapshot) -> u64)] = &[
    ("wolskill_connect_attempts", "Connection attempts started", |s| s.connect_attempts),
    ("wolskill_connect_failures", "Connection attempts that failed", |s| s.connect_failures),
    ("wolskill_sessions_established", "Sessions that reached Connected", |s| s.sessions_established),
    ("wolskill_messages_received", "Complete inbound messages", |s| s.messages_received),
    ("wolskill_messages_sent", "Outbound messages written", |s| s.messages_sent),
    ("wolskill_sends_ignored", "Sends dropped while not connected", |s| s.sends_ignored),
    ("wolskill_acks_received", "Keepalive acknowledgments", |s| s.acks_received),
    ("wolskill_commands_executed", "Shutdown commands executed", |s| s.commands_executed),
    ("wolskill_watchdog_expirations", "Liveness watchdog expirations", |s| s.watchdog_expirations),
];

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    for (name, help, _) in COUNTERS {
        describe_counter!(*name, *help);
    }

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Sync atomic counters into the metrics facade
    tokio::spawn(sync_metrics_task());

    Ok(())
}

async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last_snapshot = METRICS.snapshot();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();
        for (name, _, read) in COUNTERS {
            let delta = read(&snapshot).saturating_sub(read(&last_snapshot));
            if delta > 0 {
                counter!(*name).increment(delta);
            }
        }
        last_snapshot = snapshot;
    }
}
