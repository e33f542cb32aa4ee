//! Replica health and selection
//!
//! Endpoints carry a sticky health state that heals after a grace window.
//! Each request keeps its own failure set; the selector combines both to
//! order candidates without ever dropping one.

mod endpoint;
mod failure_set;
mod health;
mod selector;

pub use endpoint::ReplicaEndpoint;
pub use failure_set::RequestFailureSet;
pub use health::ReplicaHealthState;
pub use selector::ReplicaSelector;
