//! Transport errors
//!
//! Failures raised by channels and pools. `payload_sent` records whether
//! the request bytes may have reached the server, which decides whether
//! a failure is safe to retry for writes.

use std::fmt;

use thiserror::Error;

/// Stage at which a channel open timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    /// Waiting for a slot on the per-endpoint opening gate
    WaitingToOpen,
    /// Establishing the connection
    Opening,
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenStage::WaitingToOpen => write!(f, "waiting to open"),
            OpenStage::Opening => write!(f, "opening"),
        }
    }
}

/// Transport failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Channel open to {endpoint} timed out while {stage}")]
    OpenTimeout { endpoint: String, stage: OpenStage },

    #[error("Connect to {endpoint} failed: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out after {timeout_ms}ms (payload sent: {payload_sent})")]
    RequestTimeout {
        endpoint: String,
        timeout_ms: u64,
        payload_sent: bool,
    },

    #[error("Send to {endpoint} failed: {message}")]
    SendFailed {
        endpoint: String,
        message: String,
        payload_sent: bool,
    },

    #[error("Channel to {endpoint} is closed")]
    ChannelClosed { endpoint: String },

    #[error("Invalid channel state for {endpoint}: {message}")]
    InvalidState { endpoint: String, message: String },

    #[error("Endpoint {endpoint} at capacity: {pending} pending, ceiling {ceiling}")]
    CapacityExceeded {
        endpoint: String,
        pending: usize,
        ceiling: usize,
    },

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the request payload may have been written to the wire.
    pub fn payload_sent(&self) -> bool {
        match self {
            TransportError::RequestTimeout { payload_sent, .. }
            | TransportError::SendFailed { payload_sent, .. } => *payload_sent,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::OpenTimeout { .. } | TransportError::RequestTimeout { .. }
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
