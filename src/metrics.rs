// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the people store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `people_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, shadow, store
//! - `operation`: create, find_by_id, search, count_all, insert_batch
//! - `status`: success, error, not_found, conflict

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a repository or backend operation
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "people_store_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "people_store_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows handed to one bulk insert
pub fn record_batch_size(count: usize) {
    histogram!("people_store_batch_rows").record(count as f64);
}

/// Record a flush outcome, labelled by what triggered it
pub fn record_flush(reason: &str, success: bool) {
    counter!(
        "people_store_flushes_total",
        "reason" => reason.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}

pub fn record_flush_duration(duration: Duration) {
    histogram!("people_store_flush_seconds").record(duration.as_secs_f64());
}

/// Rows skipped by the durable uniqueness constraint
pub fn record_rows_rejected(count: usize) {
    counter!("people_store_rows_rejected_total").increment(count as u64);
}

/// A batch dropped after every flush attempt failed
pub fn record_persistence_loss(rows: usize) {
    counter!("people_store_persistence_loss_total").increment(1);
    counter!("people_store_rows_lost_total").increment(rows as u64);
}

pub fn record_flush_retry() {
    counter!("people_store_flush_retries_total").increment(1);
}

/// Record a deadline expiry
pub fn record_timeout(operation: &str) {
    counter!(
        "people_store_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Jobs accepted by the dispatcher but not yet handed to a worker
pub fn set_queue_depth(depth: usize) {
    gauge!("people_store_queue_depth").set(depth as f64);
}

pub fn set_shadow_entries(count: usize) {
    gauge!("people_store_shadow_entries").set(count as f64);
}

/// Entries pushed out of the shadow index before their flush confirmed
pub fn record_shadow_evictions(count: usize) {
    counter!("people_store_shadow_evictions_total").increment(count as u64);
}

/// Record which search tier answered
pub fn record_search(source: &str, results: usize) {
    counter!(
        "people_store_searches_total",
        "source" => source.to_string()
    )
    .increment(1);
    histogram!("people_store_search_results").record(results as f64);
}

pub fn record_connection_error(backend: &str) {
    counter!(
        "people_store_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    fn counter_value(name: &str, f: impl FnOnce()) -> u64 {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);

        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_persistence_loss_counts_rows() {
        let total = counter_value("people_store_rows_lost_total", || {
            record_persistence_loss(3);
            record_persistence_loss(2);
        });
        assert_eq!(total, 5);

        let events = counter_value("people_store_persistence_loss_total", || {
            record_persistence_loss(3);
            record_persistence_loss(2);
        });
        assert_eq!(events, 2);
    }

    #[test]
    fn test_operations_are_labelled() {
        let total = counter_value("people_store_operations_total", || {
            record_operation("store", "find_by_id", "success");
            record_operation("cache", "find_by_id", "error");
        });
        assert_eq!(total, 2);
    }

    #[test]
    fn test_gauges_and_histograms_do_not_panic() {
        set_queue_depth(10);
        set_shadow_entries(42);
        record_batch_size(100);
        record_flush("time", true);
        record_flush_duration(Duration::from_millis(5));
        record_search("shadow", 3);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("store", "count_all");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
