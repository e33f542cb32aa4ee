//! Connection collaborators
//!
//! The byte-level protocol lives behind these traits. A [`Connector`]
//! dials an endpoint; the resulting [`Connection`] carries one encoded
//! request at a time per call and reports its own liveness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::TransportResult;

/// Tracks whether a request's bytes reached the wire.
///
/// Connections call [`CallProgress::mark_sent`] after writing the payload.
/// The channel reads it when a call times out or fails.
#[derive(Debug, Clone, Default)]
pub struct CallProgress {
    sent: Arc<AtomicBool>,
}

impl CallProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_sent(&self) {
        self.sent.store(true, Ordering::Release);
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

/// An established connection to one backend endpoint.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send an encoded request and await the encoded response.
    async fn send(&self, payload: Vec<u8>, progress: &CallProgress) -> TransportResult<Vec<u8>>;

    /// Whether the connection is still usable.
    fn is_healthy(&self) -> bool;

    /// Release the underlying resources.
    async fn close(&self);
}

/// Opens connections to backend endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> TransportResult<Arc<dyn Connection>>;
}
