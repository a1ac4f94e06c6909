//! Production metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Use traces for event-level granularity during investigations.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_histogram, register_int_counter, register_int_gauge, Counter,
    Histogram, IntCounter, IntGauge,
};

/// Domain-specific metrics for production monitoring.
pub struct Metrics {
    // === Consensus ===
    /// Commands delivered to the host state machine.
    pub commands_decided: IntCounter,
    /// Quorum certificates formed or first observed.
    pub quorums_formed: IntCounter,
    /// Height of the highest committed block.
    pub bexec_height: IntGauge,

    // === Delivery ===
    /// Blocks that completed delivery.
    pub blocks_delivered: IntCounter,
    /// Seconds from first fetch request to block delivery.
    pub delivery_latency: Histogram,

    // === Fetch ===
    /// Fetches started.
    pub fetch_started: IntCounter,
    /// Fetches completed.
    pub fetch_completed: IntCounter,
    /// Fetch retries after timeout.
    pub fetch_retries: IntCounter,
    /// Fetches abandoned after exhausting retries.
    pub fetch_abandoned: IntCounter,
    /// Seconds from fetch request to response.
    pub fetch_latency: Histogram,

    // === Infrastructure ===
    /// Outbound network messages.
    pub messages_sent: Counter,
    /// Signature verifications that failed.
    pub verification_failures: IntCounter,
}

static METRICS: Lazy<Metrics> = Lazy::new(|| Metrics {
    commands_decided: register_int_counter!(
        "braid_commands_decided_total",
        "Commands delivered to the host state machine"
    )
    .expect("metric registration"),
    quorums_formed: register_int_counter!(
        "braid_quorums_formed_total",
        "Quorum certificates formed or first observed"
    )
    .expect("metric registration"),
    bexec_height: register_int_gauge!(
        "braid_bexec_height",
        "Height of the highest committed block"
    )
    .expect("metric registration"),
    blocks_delivered: register_int_counter!(
        "braid_blocks_delivered_total",
        "Blocks that completed delivery"
    )
    .expect("metric registration"),
    delivery_latency: register_histogram!(
        "braid_delivery_latency_seconds",
        "Seconds from first fetch request to block delivery"
    )
    .expect("metric registration"),
    fetch_started: register_int_counter!("braid_fetch_started_total", "Fetches started")
        .expect("metric registration"),
    fetch_completed: register_int_counter!("braid_fetch_completed_total", "Fetches completed")
        .expect("metric registration"),
    fetch_retries: register_int_counter!(
        "braid_fetch_retries_total",
        "Fetch retries after timeout"
    )
    .expect("metric registration"),
    fetch_abandoned: register_int_counter!(
        "braid_fetch_abandoned_total",
        "Fetches abandoned after exhausting retries"
    )
    .expect("metric registration"),
    fetch_latency: register_histogram!(
        "braid_fetch_latency_seconds",
        "Seconds from fetch request to response"
    )
    .expect("metric registration"),
    messages_sent: register_counter!("braid_messages_sent_total", "Outbound network messages")
        .expect("metric registration"),
    verification_failures: register_int_counter!(
        "braid_verification_failures_total",
        "Signature verifications that failed"
    )
    .expect("metric registration"),
});

/// Access the process-wide metrics.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let m = metrics();
        let before = m.commands_decided.get();
        m.commands_decided.inc();
        assert_eq!(metrics().commands_decided.get(), before + 1);
    }
}
