//! Transport
//!
//! Pooled channels over collaborator-provided connections.
//!
//! - `ConnectionChannel`: one connection, asynchronous open, bounded calls
//! - `ChannelPool`: per-endpoint admission control and round-robin
//! - `TransportClient`: endpoint to pool map

mod channel;
mod client;
mod connector;
mod errors;
mod pool;

pub use channel::{ChannelState, ConnectionChannel, TimeoutDetection};
pub use client::TransportClient;
pub use connector::{CallProgress, Connection, Connector};
pub use errors::{OpenStage, TransportError, TransportResult};
pub use pool::ChannelPool;
