//! Metrics for the Matching Engine
//!
//! Every handle is labelled with the product. Without an installed recorder
//! the handles are no-ops.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Counter,
    Gauge, Histogram, Unit,
};
use std::time::Duration;

/// Per-product engine metrics
///
/// * `matching_orders_applied_total` - orders routed to the book
/// * `matching_orders_rejected_total` - orders failing ingestion validation
/// * `matching_logs_committed_total` - log records accepted by the sink
/// * `matching_commit_batches_total` - sink writes
/// * `matching_commit_duration_seconds` - sink write latency
/// * `matching_snapshots_stored_total` / `matching_snapshots_failed_total`
/// * `matching_fetch_errors_total` - order source failures
/// * `matching_expiry_timers_active` - running expiry countdowns
/// * `matching_committed_sequence` - last log sequence accepted by the sink
#[derive(Clone)]
pub struct EngineMetrics {
    pub orders_applied: Counter,
    pub orders_rejected: Counter,
    pub logs_committed: Counter,
    pub commit_batches: Counter,
    commit_duration: Histogram,
    pub snapshots_stored: Counter,
    pub snapshots_failed: Counter,
    pub fetch_errors: Counter,
    expiry_timers: Gauge,
    committed_sequence: Gauge,
}

impl EngineMetrics {
    pub fn new(product_id: &str) -> Self {
        let product = product_id.to_string();

        Self {
            orders_applied: counter!("matching_orders_applied_total", "product" => product.clone()),
            orders_rejected: counter!("matching_orders_rejected_total", "product" => product.clone()),
            logs_committed: counter!("matching_logs_committed_total", "product" => product.clone()),
            commit_batches: counter!("matching_commit_batches_total", "product" => product.clone()),
            commit_duration: histogram!("matching_commit_duration_seconds", "product" => product.clone()),
            snapshots_stored: counter!("matching_snapshots_stored_total", "product" => product.clone()),
            snapshots_failed: counter!("matching_snapshots_failed_total", "product" => product.clone()),
            fetch_errors: counter!("matching_fetch_errors_total", "product" => product.clone()),
            expiry_timers: gauge!("matching_expiry_timers_active", "product" => product.clone()),
            committed_sequence: gauge!("matching_committed_sequence", "product" => product),
        }
    }

    /// Register descriptions with the installed recorder
    pub fn describe() {
        describe_counter!("matching_orders_applied_total", "Orders routed to the order book");
        describe_counter!("matching_orders_rejected_total", "Orders rejected at ingestion");
        describe_counter!("matching_logs_committed_total", "Log records accepted by the log sink");
        describe_counter!("matching_commit_batches_total", "Log sink writes");
        describe_histogram!(
            "matching_commit_duration_seconds",
            Unit::Seconds,
            "Log sink write latency"
        );
        describe_counter!("matching_snapshots_stored_total", "Snapshots persisted");
        describe_counter!("matching_snapshots_failed_total", "Snapshot store failures");
        describe_counter!("matching_fetch_errors_total", "Order source failures");
        describe_gauge!("matching_expiry_timers_active", "Running expiry countdowns");
        describe_gauge!("matching_committed_sequence", "Last committed log sequence");
    }

    pub fn record_commit(&self, records: usize, duration: Duration, sequence: u64) {
        self.logs_committed.increment(records as u64);
        self.commit_batches.increment(1);
        self.commit_duration.record(duration.as_secs_f64());
        self.committed_sequence.set(sequence as f64);
    }

    pub fn timer_started(&self) {
        self.expiry_timers.increment(1.0);
    }

    pub fn timer_stopped(&self) {
        self.expiry_timers.decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_work_without_recorder() {
        let metrics = EngineMetrics::new("ART-USD");
        metrics.orders_applied.increment(1);
        metrics.record_commit(3, Duration::from_millis(2), 3);
        metrics.timer_started();
        metrics.timer_stopped();
    }
}
