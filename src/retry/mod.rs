//! Retry policies
//!
//! Each policy is a small state machine owned by one logical request. It
//! sees every failure of that request and answers with a [`RetryDecision`].
//! The executor turns decisions into waits and further attempts.

mod context;
mod decision;
mod executor;
mod gone;
mod session_mismatch;

pub use context::RetryContext;
pub use decision::{RetryDecision, RetryPolicy, RoutingDirectives};
pub use executor::{execute_with_retry, execute_with_retry_and_fallback, sleep_or_cancel};
pub use gone::{
    GoneAndRetryWithPolicy, GoneOnlyRetryPolicy, MIN_EXECUTION_TIME,
    MIN_FAILED_REPLICAS_FOR_CONNECTIVITY_ISSUE,
};
pub use session_mismatch::SessionMismatchRetryPolicy;
