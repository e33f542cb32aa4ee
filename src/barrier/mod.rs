//! Replication barriers
//!
//! Used after Strong writes that are not yet globally committed, and for
//! Strong or BoundedStaleness reads whose read quorum has not caught up.

mod backoff;
mod coordinator;

pub use backoff::barrier_backoff;
pub use coordinator::{BarrierCoordinator, BarrierKind, BarrierOutcome, BarrierTarget};
