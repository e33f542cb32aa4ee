//! Observable routing events
//!
//! Events are explicit and typed. Each maps to a stable upper-case name
//! that appears as the `event` key of a log line.

use std::fmt;

/// Observable events in the routing core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Channels
    /// Channel open started
    ChannelOpenStart,
    /// Channel reached Open
    ChannelOpened,
    /// Channel open failed or timed out
    ChannelOpenFailed,
    /// Channel closed
    ChannelClosed,
    /// Request on a channel timed out
    ChannelRequestTimeout,
    /// Open failure observed after dispose, nobody left to report it to
    ChannelDisposeSwallowedFailure,
    /// Repeated timeouts with nothing received; channel reports unhealthy
    ChannelTimeoutsDetected,

    // Pool
    /// Pool opened new channels to cover pending load
    PoolGrow,
    /// Unhealthy channel removed from rotation
    PoolChannelRetired,
    /// Request rejected because the pool ceiling was reached
    PoolCapacityExceeded,

    // Replicas
    /// Replica endpoint marked unhealthy
    ReplicaMarkedUnhealthy,

    // Retry
    /// A retry was scheduled after backoff
    RetryScheduled,
    /// Retry budget exhausted
    RetryExhausted,
    /// Session-token mismatch retry scheduled
    SessionMismatchRetry,
    /// Alternate region attempt started during backoff
    RegionFallbackStart,
    /// Alternate region attempt won the race
    RegionFallbackWon,

    // Barrier
    /// Barrier target met
    BarrierMet,
    /// Barrier target not met within bounds
    BarrierNotMet,
    /// Too few replicas answered a quorum read
    ReadQuorumNotSelected,

    // Session
    /// Session tokens could not be merged
    SessionTokenConflict,

    // Requests
    /// Request completed
    RequestComplete,
    /// Request failed
    RequestFailed,
}

impl Event {
    /// Returns the event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ChannelOpenStart => "CHANNEL_OPEN_START",
            Event::ChannelOpened => "CHANNEL_OPENED",
            Event::ChannelOpenFailed => "CHANNEL_OPEN_FAILED",
            Event::ChannelClosed => "CHANNEL_CLOSED",
            Event::ChannelRequestTimeout => "CHANNEL_REQUEST_TIMEOUT",
            Event::ChannelDisposeSwallowedFailure => "CHANNEL_DISPOSE_SWALLOWED_FAILURE",
            Event::ChannelTimeoutsDetected => "CHANNEL_TIMEOUTS_DETECTED",
            Event::PoolGrow => "POOL_GROW",
            Event::PoolChannelRetired => "POOL_CHANNEL_RETIRED",
            Event::PoolCapacityExceeded => "POOL_CAPACITY_EXCEEDED",
            Event::ReplicaMarkedUnhealthy => "REPLICA_MARKED_UNHEALTHY",
            Event::RetryScheduled => "RETRY_SCHEDULED",
            Event::RetryExhausted => "RETRY_EXHAUSTED",
            Event::SessionMismatchRetry => "SESSION_MISMATCH_RETRY",
            Event::RegionFallbackStart => "REGION_FALLBACK_START",
            Event::RegionFallbackWon => "REGION_FALLBACK_WON",
            Event::BarrierMet => "BARRIER_MET",
            Event::BarrierNotMet => "BARRIER_NOT_MET",
            Event::ReadQuorumNotSelected => "READ_QUORUM_NOT_SELECTED",
            Event::SessionTokenConflict => "SESSION_TOKEN_CONFLICT",
            Event::RequestComplete => "REQUEST_COMPLETE",
            Event::RequestFailed => "REQUEST_FAILED",
        }
    }

    /// Whether this event signals a broken consistency invariant.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::SessionTokenConflict)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
