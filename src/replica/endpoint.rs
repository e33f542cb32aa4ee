//! Replica endpoints
//!
//! Shared read-mostly across requests. Health updates are plain atomic
//! stores; a stale read only affects ordering and corrects itself.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use super::health::ReplicaHealthState;

/// One physical replica address.
#[derive(Debug)]
pub struct ReplicaEndpoint {
    uri: String,
    region: Option<String>,
    is_primary: bool,
    health: AtomicU8,
    /// Reference point for `last_unhealthy_ms`.
    created: Instant,
    /// Milliseconds after `created` of the last unhealthy mark.
    last_unhealthy_ms: AtomicU64,
}

impl ReplicaEndpoint {
    /// New endpoints start `Unknown`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            region: None,
            is_primary: false,
            health: AtomicU8::new(ReplicaHealthState::Unknown as u8),
            created: Instant::now(),
            last_unhealthy_ms: AtomicU64::new(0),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Stored (sticky) state.
    pub fn health(&self) -> ReplicaHealthState {
        ReplicaHealthState::from_u8(self.health.load(Ordering::Relaxed))
    }

    pub fn set_connected(&self) {
        self.health
            .store(ReplicaHealthState::Connected as u8, Ordering::Relaxed);
    }

    pub fn set_unhealthy_pending(&self) {
        self.set_degraded(ReplicaHealthState::UnhealthyPending);
    }

    pub fn set_unhealthy(&self) {
        self.set_degraded(ReplicaHealthState::Unhealthy);
    }

    fn set_degraded(&self, state: ReplicaHealthState) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_unhealthy_ms.store(now, Ordering::Relaxed);
        self.health.store(state as u8, Ordering::Relaxed);
    }

    /// Time since the endpoint was last marked unhealthy, or since creation
    /// if it never was.
    pub fn since_last_unhealthy(&self) -> Duration {
        let marked = Duration::from_millis(self.last_unhealthy_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(marked)
    }

    /// State used for ordering.
    ///
    /// A non-connected endpoint with no unhealthy mark inside the grace
    /// window reads as `Connected`.
    pub fn effective_health(&self, grace_period: Duration) -> ReplicaHealthState {
        let state = self.health();
        if state != ReplicaHealthState::Connected && self.since_last_unhealthy() >= grace_period {
            return ReplicaHealthState::Connected;
        }
        state
    }
}
