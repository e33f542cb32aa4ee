//! Retry decisions and the policy seam

use std::time::Duration;

use crate::errors::RouterError;

/// Outcome of consulting a policy about one failure.
#[derive(Debug, Clone)]
pub enum RetryDecision<A> {
    /// Wait `after`, then run the next attempt with `args`.
    Retry { after: Duration, args: A },
    /// Stop. `Some` replaces the error surfaced to the caller; `None`
    /// surfaces the original one.
    Fail(Option<RouterError>),
}

impl<A> RetryDecision<A> {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }

    /// Backoff of a `Retry` decision.
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            RetryDecision::Retry { after, .. } => Some(*after),
            RetryDecision::Fail(_) => None,
        }
    }
}

/// A stateful retry policy scoped to one logical request.
///
/// Policies classify failures only through [`RouterError::kind`].
pub trait RetryPolicy: Send {
    /// Data handed to the next attempt.
    type Args: Send;

    fn should_retry(&mut self, error: &RouterError) -> RetryDecision<Self::Args>;
}

/// Routing adjustments the next attempt must apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDirectives {
    /// Re-resolve replica addresses, bypassing the cache
    pub force_address_refresh: bool,
    /// Refresh the collection name cache
    pub force_name_refresh: bool,
    /// Refresh the partition routing map
    pub force_partition_map_refresh: bool,
    /// Drop any cached target replica and quorum selection
    pub clear_routing_identity: bool,
    /// Time left on the request after the backoff
    pub remaining_time: Duration,
    /// Retry count before this retry
    pub attempt: u32,
    pub region_reroute_attempts: u32,
    /// Backoff being waited out; bounds an in-backoff fallback
    pub in_backoff_timeout: Duration,
}
