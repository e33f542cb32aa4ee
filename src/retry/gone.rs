//! Gone / RetryWith Policy
//!
//! Retries replica-gone, partition-migrating, invalid-partition,
//! partition-splitting and retry-with failures.
//!
//! - First retry is immediate. Later ones back off exponentially from the
//!   initial backoff, doubling, capped by the maximum backoff and by the
//!   time left in the wait budget.
//! - Retry-with runs on its own backoff track and may add random salt.
//! - A third invalid-partition is terminal.
//! - An exhausted budget surfaces the last retry-with error if there was
//!   one, otherwise service-unavailable, annotated when the client looks
//!   like the cause.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::context::RetryContext;
use super::decision::{RetryDecision, RetryPolicy, RoutingDirectives};
use crate::config::RetryConfig;
use crate::errors::{ConnectivityDiagnosis, ConnectivityIssue, RouterError, RouterErrorKind};
use crate::observability::{log_event_with_fields, Event};
use crate::router::{ConsistencyLevel, RequestDiagnostics};

/// Remaining time handed to the next attempt never drops below this.
pub const MIN_EXECUTION_TIME: Duration = Duration::from_secs(5);

/// Distinct failed replicas that suggest the client itself is cut off.
pub const MIN_FAILED_REPLICAS_FOR_CONNECTIVITY_ISSUE: usize = 3;

const BACKOFF_MULTIPLIER: u32 = 2;

/// Invalid-partition failures tolerated before giving up.
const MAX_INVALID_PARTITION_RETRIES: u32 = 2;

/// Gone-class and retry-with policy for one request.
#[derive(Debug)]
pub struct GoneAndRetryWithPolicy {
    context: RetryContext,
    wait_budget: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    current_backoff: Option<Duration>,
    retry_with_budget: Duration,
    retry_with_initial_backoff: Duration,
    retry_with_max_backoff: Duration,
    retry_with_salt_ms: Option<u64>,
    current_retry_with_backoff: Option<Duration>,
    region_reroute_min_backoff: Duration,
    detect_connectivity_issues: bool,
    cpu_overload_threshold: f64,
    invalid_partition_failures: u32,
    last_retry_with: Option<RouterError>,
    diagnostics: Option<Arc<RequestDiagnostics>>,
    rng: StdRng,
}

impl GoneAndRetryWithPolicy {
    /// Policy using the budget for the account's default consistency.
    pub fn new(config: &RetryConfig, consistency: ConsistencyLevel) -> Self {
        let wait_budget = config.wait_budget(consistency);
        let retry_with = &config.retry_with;
        Self {
            context: RetryContext::new(),
            wait_budget,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            current_backoff: None,
            retry_with_budget: retry_with
                .total_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(wait_budget),
            retry_with_initial_backoff: retry_with
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.initial_backoff()),
            retry_with_max_backoff: retry_with
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.max_backoff()),
            retry_with_salt_ms: retry_with.random_salt_max_ms.filter(|salt| *salt >= 1),
            current_retry_with_backoff: None,
            region_reroute_min_backoff: config.region_reroute_min_backoff(),
            detect_connectivity_issues: config.detect_connectivity_issues,
            cpu_overload_threshold: config.cpu_overload_threshold,
            invalid_partition_failures: 0,
            last_retry_with: None,
            diagnostics: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Attach the request's diagnostics for connectivity annotation.
    pub fn with_diagnostics(mut self, diagnostics: Arc<RequestDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn context(&self) -> &RetryContext {
        &self.context
    }

    fn handles(kind: RouterErrorKind) -> bool {
        matches!(
            kind,
            RouterErrorKind::Gone
                | RouterErrorKind::PartitionMigrating
                | RouterErrorKind::InvalidPartition
                | RouterErrorKind::PartitionSplitting
                | RouterErrorKind::RetryWith
        )
    }

    fn next_backoff(&mut self, is_retry_with: bool, remaining: Duration) -> Duration {
        if is_retry_with {
            let current = *self
                .current_retry_with_backoff
                .get_or_insert(self.retry_with_initial_backoff);
            let mut wanted = current;
            if let Some(salt) = self.retry_with_salt_ms {
                wanted += Duration::from_millis(self.rng.gen_range(1..=salt));
            }
            self.current_retry_with_backoff =
                Some((current * BACKOFF_MULTIPLIER).min(self.retry_with_max_backoff));
            wanted.min(remaining).min(self.retry_with_max_backoff)
        } else {
            let current = *self.current_backoff.get_or_insert(self.initial_backoff);
            self.current_backoff = Some((current * BACKOFF_MULTIPLIER).min(self.max_backoff));
            current.min(remaining).min(self.max_backoff)
        }
    }

    /// Error surfaced once the budget is spent.
    fn exhausted(&self, error: &RouterError) -> RouterError {
        if let Some(retry_with) = &self.last_retry_with {
            return retry_with.clone();
        }
        RouterError::ServiceUnavailable {
            message: format!("Received {} after backoff/retry", error),
            connectivity: self.diagnose(),
        }
    }

    fn diagnose(&self) -> Option<ConnectivityDiagnosis> {
        if !self.detect_connectivity_issues {
            return None;
        }
        let diagnostics = self.diagnostics.as_ref()?;
        let failed_replicas = diagnostics.failed_replica_count();
        let regions_contacted = diagnostics.regions_contacted_count().max(1);

        let issue = if diagnostics.is_cpu_overloaded(self.cpu_overload_threshold) {
            ConnectivityIssue::CpuOverload
        } else if failed_replicas >= MIN_FAILED_REPLICAS_FOR_CONNECTIVITY_ISSUE
            && !diagnostics.has_successful_region()
        {
            ConnectivityIssue::ClientUnreachable
        } else {
            return None;
        };

        Some(ConnectivityDiagnosis {
            issue,
            failed_replicas,
            regions_contacted,
        })
    }

    fn fail(&mut self, error: &RouterError, surfaced: RouterError) -> RetryDecision<RoutingDirectives> {
        self.context.record_failure(error);
        log_event_with_fields(
            Event::RetryExhausted,
            &[
                ("policy", "gone_and_retry_with"),
                ("attempts", self.context.attempt().to_string().as_str()),
                ("error", surfaced.to_string().as_str()),
            ],
        );
        RetryDecision::Fail(Some(surfaced))
    }
}

impl RetryPolicy for GoneAndRetryWithPolicy {
    type Args = RoutingDirectives;

    fn should_retry(&mut self, error: &RouterError) -> RetryDecision<RoutingDirectives> {
        let kind = error.kind();
        if !Self::handles(kind) {
            self.context.record_failure(error);
            return RetryDecision::Fail(None);
        }

        let is_retry_with = kind == RouterErrorKind::RetryWith;
        if is_retry_with {
            self.last_retry_with = Some(error.clone());
        }

        let budget = if is_retry_with {
            self.retry_with_budget
        } else {
            self.wait_budget
        };
        let remaining = budget.saturating_sub(self.context.elapsed());
        let attempt = self.context.attempt();

        let mut backoff = Duration::ZERO;
        if attempt > 0 {
            if remaining.is_zero() {
                let surfaced = self.exhausted(error);
                return self.fail(error, surfaced);
            }
            backoff = self.next_backoff(is_retry_with, remaining);
        }

        let mut directives = RoutingDirectives {
            attempt,
            in_backoff_timeout: backoff,
            remaining_time: remaining
                .checked_sub(backoff)
                .filter(|left| !left.is_zero())
                .unwrap_or(MIN_EXECUTION_TIME),
            ..RoutingDirectives::default()
        };

        match kind {
            RouterErrorKind::Gone => directives.force_address_refresh = true,
            RouterErrorKind::PartitionMigrating => {
                directives.clear_routing_identity = true;
                directives.force_partition_map_refresh = true;
                directives.force_name_refresh = true;
            }
            RouterErrorKind::InvalidPartition => {
                self.invalid_partition_failures += 1;
                if self.invalid_partition_failures > MAX_INVALID_PARTITION_RETRIES {
                    let surfaced = RouterError::ServiceUnavailable {
                        message: format!("Repeated invalid partition: {}", error),
                        connectivity: None,
                    };
                    return self.fail(error, surfaced);
                }
                directives.clear_routing_identity = true;
                directives.force_name_refresh = true;
            }
            RouterErrorKind::PartitionSplitting => {
                directives.clear_routing_identity = true;
                directives.force_partition_map_refresh = true;
            }
            _ => {}
        }

        if backoff >= self.region_reroute_min_backoff && !backoff.is_zero() {
            self.context.record_region_reroute();
        }
        directives.region_reroute_attempts = self.context.region_reroute_attempts();

        self.context.record_retry(backoff, error);
        self.context.set_current_backoff(backoff);

        log_event_with_fields(
            Event::RetryScheduled,
            &[
                ("policy", "gone_and_retry_with"),
                ("attempt", self.context.attempt().to_string().as_str()),
                ("backoff_ms", backoff.as_millis().to_string().as_str()),
                ("region_reroutes", directives.region_reroute_attempts.to_string().as_str()),
                ("error", error.to_string().as_str()),
            ],
        );

        RetryDecision::Retry {
            after: backoff,
            args: directives,
        }
    }
}

/// Bounded policy for a fallback attempt in another region.
///
/// Only replica-gone is retried, so a fallback never escalates into the
/// full partition-level retry set.
#[derive(Debug)]
pub struct GoneOnlyRetryPolicy {
    context: RetryContext,
    max_attempts: u32,
    wait_budget: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    current_backoff: Option<Duration>,
}

impl GoneOnlyRetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            context: RetryContext::new(),
            max_attempts: config.fallback_max_attempts,
            wait_budget: config.fallback_wait_budget(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            current_backoff: None,
        }
    }

    pub fn context(&self) -> &RetryContext {
        &self.context
    }
}

impl RetryPolicy for GoneOnlyRetryPolicy {
    type Args = RoutingDirectives;

    fn should_retry(&mut self, error: &RouterError) -> RetryDecision<RoutingDirectives> {
        if error.kind() != RouterErrorKind::Gone {
            self.context.record_failure(error);
            return RetryDecision::Fail(None);
        }

        let attempt = self.context.attempt();
        let remaining = self.wait_budget.saturating_sub(self.context.elapsed());
        if attempt >= self.max_attempts || (attempt > 0 && remaining.is_zero()) {
            self.context.record_failure(error);
            return RetryDecision::Fail(None);
        }

        let backoff = if attempt == 0 {
            Duration::ZERO
        } else {
            let current = *self.current_backoff.get_or_insert(self.initial_backoff);
            self.current_backoff = Some((current * BACKOFF_MULTIPLIER).min(self.max_backoff));
            current.min(remaining).min(self.max_backoff)
        };

        self.context.record_retry(backoff, error);
        RetryDecision::Retry {
            after: backoff,
            args: RoutingDirectives {
                force_address_refresh: true,
                attempt,
                remaining_time: remaining.saturating_sub(backoff),
                in_backoff_timeout: backoff,
                ..RoutingDirectives::default()
            },
        }
    }
}
