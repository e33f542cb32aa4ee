//! Session-token mismatch policy
//!
//! Retries read-session-not-available locally with a short exponential
//! backoff. With remote-region preference the local retries are capped at
//! `max_in_region_retry_count - 1`, and the last local backoff is stretched
//! so the request spends at least the minimum dwell time in the region
//! before conceding to regional failover.

use std::time::Duration;

use super::context::RetryContext;
use super::decision::{RetryDecision, RetryPolicy};
use crate::config::SessionRetryConfig;
use crate::errors::{RouterError, RouterErrorKind};
use crate::observability::{log_event_with_fields, Event};

#[derive(Debug)]
pub struct SessionMismatchRetryPolicy {
    config: SessionRetryConfig,
    context: RetryContext,
    next_backoff: Duration,
}

impl SessionMismatchRetryPolicy {
    pub fn new(config: &SessionRetryConfig) -> Self {
        Self {
            config: config.clone(),
            context: RetryContext::new(),
            next_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    pub fn context(&self) -> &RetryContext {
        &self.context
    }

    /// Local retries allowed before conceding, when remote is preferred.
    fn local_retry_cap(&self) -> Option<u32> {
        self.config
            .remote_region_preferred
            .then(|| self.config.max_in_region_retry_count.saturating_sub(1))
    }
}

impl RetryPolicy for SessionMismatchRetryPolicy {
    /// Retry count of the next attempt.
    type Args = u32;

    fn should_retry(&mut self, error: &RouterError) -> RetryDecision<u32> {
        if error.kind() != RouterErrorKind::ReadSessionNotAvailable {
            self.context.record_failure(error);
            return RetryDecision::Fail(None);
        }

        let elapsed = self.context.elapsed();
        let remaining = Duration::from_millis(self.config.wait_budget_ms).saturating_sub(elapsed);
        let attempt = self.context.attempt();

        if remaining.is_zero() {
            self.context.record_failure(error);
            return RetryDecision::Fail(None);
        }

        let local_cap = self.local_retry_cap();
        if let Some(cap) = local_cap {
            if attempt >= cap {
                self.context.record_failure(error);
                return RetryDecision::Fail(None);
            }
        }

        let mut backoff = if attempt == 0 {
            Duration::ZERO
        } else {
            let current = self.next_backoff;
            let max = Duration::from_millis(self.config.max_backoff_ms);
            self.next_backoff = (current * self.config.backoff_multiplier).min(max);
            current.min(max)
        };

        if local_cap == Some(attempt + 1) {
            let dwell = Duration::from_millis(self.config.min_in_region_retry_time_ms)
                .saturating_sub(elapsed);
            backoff = backoff.max(dwell);
        }
        backoff = backoff.min(remaining);

        self.context.record_retry(backoff, error);
        log_event_with_fields(
            Event::SessionMismatchRetry,
            &[
                ("attempt", self.context.attempt().to_string().as_str()),
                ("backoff_ms", backoff.as_millis().to_string().as_str()),
            ],
        );

        RetryDecision::Retry {
            after: backoff,
            args: attempt + 1,
        }
    }
}
