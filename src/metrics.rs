// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for token-tiers.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `token_tiers_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: L1, L2, L3, all
//! - `operation`: get, set, insert, delete, lookup, list, sweep
//! - `status`: hit, miss, success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a tier operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "token_tiers_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "token_tiers_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "token_tiers_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a deadline expiry on a remote call
pub fn record_timeout(tier: &str, operation: &str) {
    counter!(
        "token_tiers_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a promotion into a faster tier
pub fn record_promotion(from: &str, to: &str) {
    counter!(
        "token_tiers_promotions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SWEEPS
// ═══════════════════════════════════════════════════════════════════════════

/// Record an L1 sweep tick
pub fn record_l1_sweep(evicted: usize, flushed: usize, duration: Duration) {
    counter!("token_tiers_l1_evicted_total").increment(evicted as u64);
    counter!("token_tiers_l1_flushed_total").increment(flushed as u64);
    histogram!("token_tiers_sweep_seconds", "sweep" => "l1").record(duration.as_secs_f64());
}

/// Record an L3 expiration sweep tick
pub fn record_expiration_sweep(deleted: u64, duration: Duration) {
    counter!("token_tiers_l3_expired_total").increment(deleted);
    histogram!("token_tiers_sweep_seconds", "sweep" => "l3").record(duration.as_secs_f64());
}

/// Background error delivered (or not) to the error channel
pub fn record_background_error(task: &str, delivered: bool) {
    if delivered {
        counter!("token_tiers_background_errors_total", "task" => task.to_string()).increment(1);
    } else {
        counter!("token_tiers_background_errors_dropped_total", "task" => task.to_string())
            .increment(1);
    }
}

/// Set current L1 entry count
pub fn set_l1_entries(count: usize) {
    gauge!("token_tiers_l1_entries").set(count as f64);
}

/// RAII timer that records latency on drop.
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
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
