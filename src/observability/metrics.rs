//! Metrics registry for the routing core
//!
//! - Counters only, monotonic
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the orchestrator, pools and policies.
///
/// All counters use Relaxed ordering; readers tolerate slightly stale values.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests_executed: AtomicU64,
    requests_failed: AtomicU64,
    retries: AtomicU64,
    session_mismatch_retries: AtomicU64,
    region_fallbacks: AtomicU64,
    channels_opened: AtomicU64,
    channels_closed: AtomicU64,
    capacity_rejections: AtomicU64,
    replicas_marked_unhealthy: AtomicU64,
    barrier_probes: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests_executed(&self) {
        self.requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_session_mismatch_retries(&self) {
        self.session_mismatch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_region_fallbacks(&self) {
        self.region_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channels_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channels_closed(&self) {
        self.channels_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_capacity_rejections(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replicas_marked_unhealthy(&self) {
        self.replicas_marked_unhealthy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_barrier_probes(&self, probes: u64) {
        self.barrier_probes.fetch_add(probes, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            session_mismatch_retries: self.session_mismatch_retries.load(Ordering::Relaxed),
            region_fallbacks: self.region_fallbacks.load(Ordering::Relaxed),
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channels_closed: self.channels_closed.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            replicas_marked_unhealthy: self.replicas_marked_unhealthy.load(Ordering::Relaxed),
            barrier_probes: self.barrier_probes.load(Ordering::Relaxed),
        }
    }

    /// Current counters rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_executed: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub session_mismatch_retries: u64,
    pub region_fallbacks: u64,
    pub channels_opened: u64,
    pub channels_closed: u64,
    pub capacity_rejections: u64,
    pub replicas_marked_unhealthy: u64,
    pub barrier_probes: u64,
}
