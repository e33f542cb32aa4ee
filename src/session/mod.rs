//! Session Consistency
//!
//! - `SessionToken`: immutable per-partition vector clock
//! - `SessionContainer`: per-collection cache of the latest merged tokens
//!
//! Merge is commutative, associative and idempotent. Equal versions with
//! different region sets are a consistency-configuration error.

mod container;
mod errors;
mod token;

pub use container::{parse_compound, SessionContainer};
pub use errors::{SessionResult, SessionTokenError};
pub use token::SessionToken;
