//! Barrier Coordinator
//!
//! Repeats lightweight read probes against a partition until a probe
//! reports progress at or beyond the target LSN. Probe pacing follows the
//! reported gap. Bounded by both a probe count and a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::backoff::barrier_backoff;
use crate::config::BarrierConfig;
use crate::errors::{RouterError, RouterErrorKind, RouterResult};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::retry::sleep_or_cancel;
use crate::router::StoreResponse;

/// Which progress marker must reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    /// Replica LSN
    Lsn,
    /// Global committed LSN
    GlobalCommittedLsn,
}

impl BarrierKind {
    fn as_str(&self) -> &'static str {
        match self {
            BarrierKind::Lsn => "lsn",
            BarrierKind::GlobalCommittedLsn => "global_committed_lsn",
        }
    }
}

/// Progress a barrier waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierTarget {
    pub kind: BarrierKind,
    pub lsn: i64,
}

impl BarrierTarget {
    pub fn lsn(lsn: i64) -> Self {
        Self {
            kind: BarrierKind::Lsn,
            lsn,
        }
    }

    pub fn global_committed(lsn: i64) -> Self {
        Self {
            kind: BarrierKind::GlobalCommittedLsn,
            lsn,
        }
    }

    /// Progress reported by a probe response.
    pub fn observed(&self, response: &StoreResponse) -> i64 {
        match self.kind {
            BarrierKind::Lsn => response.lsn,
            BarrierKind::GlobalCommittedLsn => response.global_committed_lsn,
        }
    }

    /// Remaining gap. A non-zero sub-status is the server's own figure.
    pub fn gap(&self, response: &StoreResponse) -> u64 {
        if response.sub_status_code != 0 {
            return u64::from(response.sub_status_code);
        }
        self.lsn.saturating_sub(self.observed(response)).max(0) as u64
    }
}

/// How a barrier wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierOutcome {
    Met { probes: u32, observed: i64 },
    NotMet { probes: u32, observed: Option<i64> },
}

impl BarrierOutcome {
    pub fn is_met(&self) -> bool {
        matches!(self, BarrierOutcome::Met { .. })
    }

    pub fn probes(&self) -> u32 {
        match self {
            BarrierOutcome::Met { probes, .. } | BarrierOutcome::NotMet { probes, .. } => *probes,
        }
    }

    /// `Gone` for an unmet barrier, so the request is retried elsewhere.
    pub fn into_result(self) -> RouterResult<()> {
        match self {
            BarrierOutcome::Met { .. } => Ok(()),
            BarrierOutcome::NotMet { probes, observed } => Err(RouterError::gone(format!(
                "barrier not met after {} probes (last observed {:?})",
                probes, observed
            ))),
        }
    }
}

/// Drives barrier probes.
#[derive(Debug)]
pub struct BarrierCoordinator {
    config: BarrierConfig,
    metrics: Arc<MetricsRegistry>,
}

impl BarrierCoordinator {
    pub fn new(config: BarrierConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self { config, metrics }
    }

    /// Probe until `target` is met, probes run out, or the timeout passes.
    ///
    /// `probe` receives the zero-based probe index. Probe failures count
    /// against the probe budget; cancellation ends the wait with an error.
    pub async fn wait<F, Fut>(
        &self,
        target: BarrierTarget,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> RouterResult<BarrierOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = RouterResult<StoreResponse>>,
    {
        let scope = ObservationScope::with_fields(
            "BARRIER",
            &[
                ("kind", target.kind.as_str()),
                ("target_lsn", target.lsn.to_string().as_str()),
            ],
        );
        let deadline = Instant::now() + self.config.timeout();
        let mut probes = 0u32;
        let mut observed = None;
        let mut delay = Duration::ZERO;

        while probes < self.config.max_probes {
            if let Err(error) = sleep_until_deadline(delay, deadline, cancel).await {
                self.metrics.add_barrier_probes(u64::from(probes));
                scope.fail("cancelled");
                return Err(error);
            }
            if Instant::now() >= deadline {
                break;
            }

            let started = Instant::now();
            let result = match timeout_at(deadline, probe(probes)).await {
                Ok(result) => result,
                Err(_) => break,
            };
            probes += 1;
            let latency = started.elapsed();

            match result {
                Ok(response) => {
                    let progress = target.observed(&response);
                    observed = Some(progress);
                    if progress >= target.lsn {
                        self.metrics.add_barrier_probes(u64::from(probes));
                        log_event_with_fields(
                            Event::BarrierMet,
                            &[
                                ("target_lsn", target.lsn.to_string().as_str()),
                                ("observed", progress.to_string().as_str()),
                                ("probes", probes.to_string().as_str()),
                            ],
                        );
                        scope.complete_with_fields(&[("probes", probes.to_string().as_str())]);
                        return Ok(BarrierOutcome::Met {
                            probes,
                            observed: progress,
                        });
                    }
                    delay = barrier_backoff(target.gap(&response), latency);
                }
                Err(error) if error.kind() == RouterErrorKind::Cancelled => {
                    self.metrics.add_barrier_probes(u64::from(probes));
                    scope.fail("cancelled");
                    return Err(error);
                }
                Err(error) => {
                    let gap = observed
                        .map(|seen| target.lsn.saturating_sub(seen).max(0) as u64)
                        .unwrap_or(u64::MAX);
                    delay = barrier_backoff(gap, latency);
                    log_event_with_fields(
                        Event::RetryScheduled,
                        &[
                            ("policy", "barrier"),
                            ("probe", probes.to_string().as_str()),
                            ("error", error.to_string().as_str()),
                        ],
                    );
                }
            }
        }

        self.metrics.add_barrier_probes(u64::from(probes));
        log_event_with_fields(
            Event::BarrierNotMet,
            &[
                ("target_lsn", target.lsn.to_string().as_str()),
                ("probes", probes.to_string().as_str()),
            ],
        );
        scope.fail("barrier not met");
        Ok(BarrierOutcome::NotMet { probes, observed })
    }
}

/// Sleep for `delay`, cut short at `deadline`.
async fn sleep_until_deadline(
    delay: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> RouterResult<()> {
    let left = deadline.saturating_duration_since(Instant::now());
    sleep_or_cancel(delay.min(left), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn response(lsn: i64, global: i64, gap: u32) -> StoreResponse {
        let mut response = StoreResponse::new(200);
        response.lsn = lsn;
        response.global_committed_lsn = global;
        response.sub_status_code = gap;
        response
    }

    fn coordinator(max_probes: u32, timeout_ms: u64) -> BarrierCoordinator {
        BarrierCoordinator::new(
            BarrierConfig {
                max_probes,
                timeout_ms,
            },
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_gap_source() {
        let target = BarrierTarget::global_committed(2_000);
        assert_eq!(target.gap(&response(0, 500, 0)), 1_500);
        assert_eq!(target.gap(&response(0, 500, 42)), 42);
        assert_eq!(target.gap(&response(0, 9_000, 0)), 0);
        assert_eq!(BarrierTarget::lsn(10).observed(&response(7, 3, 0)), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_met_after_progress() {
        let coordinator = coordinator(30, 30_000);
        let seen = Mutex::new(Vec::new());
        let outcome = coordinator
            .wait(BarrierTarget::global_committed(100), &CancellationToken::new(), |i| {
                seen.lock().unwrap().push(tokio::time::Instant::now());
                async move { Ok(response(0, 40 * i as i64, 0)) }
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BarrierOutcome::Met {
                probes: 4,
                observed: 120
            }
        );
        assert_eq!(coordinator.metrics.snapshot().barrier_probes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_delay_follows_gap() {
        let coordinator = coordinator(2, 30_000);
        let times = Mutex::new(Vec::new());
        let outcome = coordinator
            .wait(BarrierTarget::global_committed(2_000), &CancellationToken::new(), |_| {
                times.lock().unwrap().push(tokio::time::Instant::now());
                async { Ok(response(0, 500, 0)) }
            })
            .await
            .unwrap();
        assert!(!outcome.is_met());
        assert_eq!(outcome.probes(), 2);
        let times = times.lock().unwrap();
        // Gap 1500 -> 100ms, probes themselves take no time.
        let gap = times[1] - times[0];
        assert!(gap >= Duration::from_millis(99) && gap <= Duration::from_millis(101));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_met_becomes_gone() {
        let coordinator = coordinator(3, 30_000);
        let outcome = coordinator
            .wait(BarrierTarget::lsn(10), &CancellationToken::new(), |_| async {
                Ok(response(1, 1, 0))
            })
            .await
            .unwrap();
        assert_eq!(outcome.probes(), 3);
        let error = outcome.into_result().unwrap_err();
        assert_eq!(error.kind(), RouterErrorKind::Gone);
        assert!(error.to_string().contains("barrier not met"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_wait() {
        let coordinator = coordinator(1_000, 2_500);
        let outcome = coordinator
            .wait(BarrierTarget::lsn(1_000_000), &CancellationToken::new(), |_| async {
                Ok(response(0, 0, 0))
            })
            .await
            .unwrap();
        // 1s pacing for a huge gap: probes at 0s, 1s, 2s.
        assert!(!outcome.is_met());
        assert_eq!(outcome.probes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_count_and_cancel_propagates() {
        let coordinator = coordinator(3, 30_000);
        let outcome = coordinator
            .wait(BarrierTarget::lsn(5), &CancellationToken::new(), |_| async {
                Err::<StoreResponse, _>(RouterError::gone("replica down"))
            })
            .await
            .unwrap();
        assert_eq!(outcome, BarrierOutcome::NotMet { probes: 3, observed: None });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = coordinator
            .wait(BarrierTarget::lsn(5), &cancel, |_| async { Ok(response(9, 9, 0)) })
            .await;
        assert!(matches!(result, Err(RouterError::Cancelled)));
    }
}
