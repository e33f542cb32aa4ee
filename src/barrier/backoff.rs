//! Gap-driven probe pacing

use std::time::Duration;

/// Delay before the next barrier probe.
///
/// Derived from the LSN gap the previous probe reported, minus that
/// probe's own latency, never below zero.
///
/// | gap | delay |
/// |---|---|
/// | >= 10_000 | 1000ms |
/// | >= 1_000 | 100ms |
/// | >= 100 | 10ms |
/// | otherwise | none |
pub fn barrier_backoff(gap: u64, last_latency: Duration) -> Duration {
    let base = match gap {
        g if g >= 10_000 => Duration::from_millis(1_000),
        g if g >= 1_000 => Duration::from_millis(100),
        g if g >= 100 => Duration::from_millis(10),
        _ => Duration::ZERO,
    };
    base.saturating_sub(last_latency)
}
