//! Observability for the routing core
//!
//! - Structured JSON logging
//! - Atomic counters
//! - Typed lifecycle events
//!
//! Observability is read-only: nothing here changes routing decisions, and
//! a failed log write never fails a request.
//!
//! ```ignore
//! use aeroroute::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::PoolGrow, &[("endpoint", "rntbd://a:1"), ("channels", "2")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Severity an event is logged at when no explicit level is given.
pub fn default_severity(event: Event) -> Severity {
    if event.is_fatal() {
        return Severity::Fatal;
    }
    match event {
        Event::ChannelOpenFailed
        | Event::ChannelRequestTimeout
        | Event::ChannelDisposeSwallowedFailure
        | Event::ChannelTimeoutsDetected
        | Event::PoolCapacityExceeded
        | Event::PoolChannelRetired
        | Event::ReplicaMarkedUnhealthy
        | Event::RetryScheduled
        | Event::SessionMismatchRetry
        | Event::BarrierNotMet
        | Event::ReadQuorumNotSelected => Severity::Warn,
        Event::RetryExhausted | Event::RequestFailed => Severity::Error,
        Event::RequestComplete => Severity::Trace,
        _ => Severity::Info,
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(default_severity(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(default_severity(event), event.as_str(), fields);
}
