//! Per-request diagnostics
//!
//! Shared between the orchestrator and the retry policies of one logical
//! request. Feeds replica ordering and connectivity annotation.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::collaborators::CpuMonitor;
use crate::replica::RequestFailureSet;

#[derive(Default)]
struct DiagnosticsState {
    failed: Option<RequestFailureSet>,
    regions_contacted: BTreeSet<String>,
    successful_regions: BTreeSet<String>,
}

/// What one request has seen so far.
pub struct RequestDiagnostics {
    cpu: Arc<dyn CpuMonitor>,
    state: Mutex<DiagnosticsState>,
}

impl RequestDiagnostics {
    pub fn new(cpu: Arc<dyn CpuMonitor>) -> Self {
        Self {
            cpu,
            state: Mutex::new(DiagnosticsState::default()),
        }
    }

    /// Record a failed replica. Returns true the first time it fails.
    pub fn record_failure(&self, uri: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .failed
            .get_or_insert_with(RequestFailureSet::new)
            .insert(uri)
    }

    pub fn record_contact(&self, region: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.regions_contacted.insert(region.to_string());
    }

    pub fn record_success(&self, region: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.regions_contacted.insert(region.to_string());
        state.successful_regions.insert(region.to_string());
    }

    /// Copy of the failure set, if anything has failed.
    pub fn failed_replicas(&self) -> Option<RequestFailureSet> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failed
            .clone()
    }

    pub fn failed_replica_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failed
            .as_ref()
            .map(RequestFailureSet::len)
            .unwrap_or(0)
    }

    pub fn regions_contacted_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .regions_contacted
            .len()
    }

    pub fn has_successful_region(&self) -> bool {
        !self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .successful_regions
            .is_empty()
    }

    /// NaN load never counts as overloaded.
    pub fn is_cpu_overloaded(&self, threshold: f64) -> bool {
        let load = self.cpu.current_cpu_load();
        load.is_finite() && load >= threshold
    }
}

impl std::fmt::Debug for RequestDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDiagnostics")
            .field("failed_replicas", &self.failed_replica_count())
            .field("regions_contacted", &self.regions_contacted_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::FixedCpuMonitor;

    #[test]
    fn test_failure_set_is_lazy() {
        let diagnostics = RequestDiagnostics::new(Arc::new(FixedCpuMonitor::unknown()));
        assert!(diagnostics.failed_replicas().is_none());
        assert!(diagnostics.record_failure("a"));
        assert!(!diagnostics.record_failure("a"));
        assert_eq!(diagnostics.failed_replica_count(), 1);
        assert!(diagnostics.failed_replicas().unwrap().contains("a"));
    }

    #[test]
    fn test_regions() {
        let diagnostics = RequestDiagnostics::new(Arc::new(FixedCpuMonitor::unknown()));
        diagnostics.record_contact("west");
        assert!(!diagnostics.has_successful_region());
        diagnostics.record_success("east");
        assert!(diagnostics.has_successful_region());
        assert_eq!(diagnostics.regions_contacted_count(), 2);
    }

    #[test]
    fn test_cpu_overload() {
        assert!(!RequestDiagnostics::new(Arc::new(FixedCpuMonitor::unknown())).is_cpu_overloaded(90.0));
        assert!(RequestDiagnostics::new(Arc::new(FixedCpuMonitor::new(95.0))).is_cpu_overloaded(90.0));
        assert!(!RequestDiagnostics::new(Arc::new(FixedCpuMonitor::new(50.0))).is_cpu_overloaded(90.0));
    }
}
