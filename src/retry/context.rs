//! Per-request retry bookkeeping

use std::time::Duration;

use tokio::time::Instant;

use crate::errors::RouterError;

/// Mutable state of one logical request across all its retries.
#[derive(Debug)]
pub struct RetryContext {
    attempt: u32,
    region_reroute_attempts: u32,
    started: Instant,
    cumulative_backoff: Duration,
    current_backoff: Option<Duration>,
    last_error: Option<RouterError>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            region_reroute_attempts: 0,
            started: Instant::now(),
            cumulative_backoff: Duration::ZERO,
            current_backoff: None,
            last_error: None,
        }
    }

    /// Retries granted so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn region_reroute_attempts(&self) -> u32 {
        self.region_reroute_attempts
    }

    /// Time charged against the budget: wall time, but never less than the
    /// backoff already handed out.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed().max(self.cumulative_backoff)
    }

    pub fn cumulative_backoff(&self) -> Duration {
        self.cumulative_backoff
    }

    /// Backoff for the next delayed retry, if one was scheduled.
    pub fn current_backoff(&self) -> Option<Duration> {
        self.current_backoff
    }

    pub fn set_current_backoff(&mut self, backoff: Duration) {
        self.current_backoff = Some(backoff);
    }

    pub fn last_error(&self) -> Option<&RouterError> {
        self.last_error.as_ref()
    }

    /// Record a granted retry and its backoff.
    pub fn record_retry(&mut self, backoff: Duration, error: &RouterError) {
        self.attempt += 1;
        self.cumulative_backoff += backoff;
        self.last_error = Some(error.clone());
    }

    pub fn record_region_reroute(&mut self) {
        self.region_reroute_attempts += 1;
    }

    /// Record a failure that was not retried.
    pub fn record_failure(&mut self, error: &RouterError) {
        self.last_error = Some(error.clone());
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}
