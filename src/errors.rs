//! Router Error Taxonomy
//!
//! - Transient: gone, partition migrating/splitting/invalid, retry-with,
//!   read-session-not-available. Retried by policies.
//! - Range gone: surfaced to the caller, which owns the routing map and
//!   re-resolves the key range.
//! - Capacity: pool saturated. Fails fast, never queued.
//! - Timeout: only timeouts whose payload was provably not sent are
//!   retried blindly. Sent-and-unconfirmed write timeouts surface with
//!   `maybe_executed = true`.
//! - Terminal: exhausted budgets, repeated invalid partition, token merge
//!   conflicts. Surfaced as service-unavailable or internal errors.
//!
//! Policies classify errors only through [`RouterErrorKind`].

use std::fmt;

use thiserror::Error;

use crate::session::SessionTokenError;
use crate::transport::TransportError;

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Backend status codes the router interprets.
pub mod status {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const GONE: u16 = 410;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Sub-status codes qualifying 404 and 410 responses.
pub mod sub_status {
    pub const UNKNOWN: u32 = 0;
    pub const NAME_CACHE_IS_STALE: u32 = 1000;
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;
    pub const COMPLETING_SPLIT: u32 = 1007;
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
}

/// Why a terminal service-unavailable looks like a client-side problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityIssue {
    /// Client CPU was overloaded while the request ran
    CpuOverload,
    /// Several distinct replicas failed with no region answering
    ClientUnreachable,
}

/// Connectivity annotation attached to a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityDiagnosis {
    pub issue: ConnectivityIssue,
    pub failed_replicas: usize,
    pub regions_contacted: usize,
}

impl fmt::Display for ConnectivityDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = match self.issue {
            ConnectivityIssue::CpuOverload => "client CPU overloaded",
            ConnectivityIssue::ClientUnreachable => "client could not reach service",
        };
        write!(
            f,
            "{} ({} failed replicas across {} regions)",
            cause, self.failed_replicas, self.regions_contacted
        )
    }
}

fn connectivity_suffix(connectivity: &Option<ConnectivityDiagnosis>) -> String {
    connectivity
        .as_ref()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default()
}

/// Routing errors
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error("Replica gone: {message}")]
    Gone { message: String },

    #[error("Partition is migrating: {message}")]
    PartitionMigrating { message: String },

    #[error("Invalid partition: {message}")]
    InvalidPartition { message: String },

    #[error("Partition is splitting: {message}")]
    PartitionSplitting { message: String },

    /// Not retried here. The key range must be re-resolved by the caller.
    #[error("Partition key range gone: {message}")]
    PartitionKeyRangeGone { message: String },

    #[error("Retry with: {message}")]
    RetryWith { message: String },

    #[error("Read session not available: {message}")]
    ReadSessionNotAvailable { message: String },

    #[error("Request rate too large: {message}")]
    RequestRateTooLarge { message: String },

    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    #[error("Request timeout (maybe executed: {maybe_executed}): {message}")]
    RequestTimeout { message: String, maybe_executed: bool },

    #[error("Service unavailable: {message}{}", connectivity_suffix(.connectivity))]
    ServiceUnavailable {
        message: String,
        connectivity: Option<ConnectivityDiagnosis>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Session token error: {0}")]
    SessionToken(#[from] SessionTokenError),

    #[error("Backend returned {status_code}/{sub_status_code}: {message}")]
    Status {
        status_code: u16,
        sub_status_code: u32,
        message: String,
    },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Request cancelled")]
    Cancelled,
}

/// Exhaustive classification used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterErrorKind {
    Gone,
    PartitionMigrating,
    InvalidPartition,
    PartitionSplitting,
    PartitionKeyRangeGone,
    RetryWith,
    ReadSessionNotAvailable,
    RequestRateTooLarge,
    CapacityExceeded,
    RequestTimeout,
    ServiceUnavailable,
    Internal,
    ConsistencyViolation,
    Status,
    BadRequest,
    Cancelled,
}

impl RouterError {
    pub fn gone(message: impl Into<String>) -> Self {
        Self::Gone {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
            connectivity: None,
        }
    }

    pub fn read_session_not_available(message: impl Into<String>) -> Self {
        Self::ReadSessionNotAvailable {
            message: message.into(),
        }
    }

    /// Classify a backend status. Returns `None` for success codes.
    pub fn from_status(status_code: u16, sub_status_code: u32, message: &str) -> Option<Self> {
        let message = message.to_string();
        let error = match (status_code, sub_status_code) {
            (code, _) if code < 400 => return None,
            (status::GONE, sub_status::NAME_CACHE_IS_STALE) => Self::InvalidPartition { message },
            (status::GONE, sub_status::PARTITION_KEY_RANGE_GONE) => {
                Self::PartitionKeyRangeGone { message }
            }
            (status::GONE, sub_status::COMPLETING_SPLIT) => Self::PartitionSplitting { message },
            (status::GONE, sub_status::COMPLETING_PARTITION_MIGRATION) => {
                Self::PartitionMigrating { message }
            }
            (status::GONE, _) => Self::Gone { message },
            (status::RETRY_WITH, _) => Self::RetryWith { message },
            (status::NOT_FOUND, sub_status::READ_SESSION_NOT_AVAILABLE) => {
                Self::ReadSessionNotAvailable { message }
            }
            (status::TOO_MANY_REQUESTS, _) => Self::RequestRateTooLarge { message },
            (status::SERVICE_UNAVAILABLE, _) => Self::ServiceUnavailable {
                message,
                connectivity: None,
            },
            (status::INTERNAL_SERVER_ERROR, _) => Self::Internal { message },
            (status::BAD_REQUEST, _) => Self::BadRequest { message },
            (status_code, sub_status_code) => Self::Status {
                status_code,
                sub_status_code,
                message,
            },
        };
        Some(error)
    }

    /// Map a transport failure.
    ///
    /// Anything that provably never put the payload on the wire is a safe
    /// `Gone`. A sent-but-unconfirmed failure is also `Gone` for read-only
    /// operations; for writes it surfaces as a timeout with
    /// `maybe_executed = true`.
    pub fn from_transport(error: TransportError, read_only: bool) -> Self {
        match &error {
            TransportError::Cancelled => Self::Cancelled,
            TransportError::CapacityExceeded { .. } => Self::CapacityExceeded {
                message: error.to_string(),
            },
            TransportError::InvalidState { .. } => Self::Internal {
                message: error.to_string(),
            },
            _ if !error.payload_sent() || read_only => Self::Gone {
                message: error.to_string(),
            },
            _ => Self::RequestTimeout {
                message: error.to_string(),
                maybe_executed: true,
            },
        }
    }

    /// Exhaustive classification.
    pub fn kind(&self) -> RouterErrorKind {
        match self {
            Self::Gone { .. } => RouterErrorKind::Gone,
            Self::PartitionMigrating { .. } => RouterErrorKind::PartitionMigrating,
            Self::InvalidPartition { .. } => RouterErrorKind::InvalidPartition,
            Self::PartitionSplitting { .. } => RouterErrorKind::PartitionSplitting,
            Self::PartitionKeyRangeGone { .. } => RouterErrorKind::PartitionKeyRangeGone,
            Self::RetryWith { .. } => RouterErrorKind::RetryWith,
            Self::ReadSessionNotAvailable { .. } => RouterErrorKind::ReadSessionNotAvailable,
            Self::RequestRateTooLarge { .. } => RouterErrorKind::RequestRateTooLarge,
            Self::CapacityExceeded { .. } => RouterErrorKind::CapacityExceeded,
            Self::RequestTimeout { .. } => RouterErrorKind::RequestTimeout,
            Self::ServiceUnavailable { .. } => RouterErrorKind::ServiceUnavailable,
            Self::Internal { .. } => RouterErrorKind::Internal,
            Self::SessionToken(e) if e.is_consistency_violation() => {
                RouterErrorKind::ConsistencyViolation
            }
            Self::SessionToken(_) => RouterErrorKind::BadRequest,
            Self::Status { .. } => RouterErrorKind::Status,
            Self::BadRequest { .. } => RouterErrorKind::BadRequest,
            Self::Cancelled => RouterErrorKind::Cancelled,
        }
    }

    /// Whether a local retry policy may handle this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            RouterErrorKind::Gone
                | RouterErrorKind::PartitionMigrating
                | RouterErrorKind::InvalidPartition
                | RouterErrorKind::PartitionSplitting
                | RouterErrorKind::RetryWith
                | RouterErrorKind::ReadSessionNotAvailable
        )
    }

    /// Whether the failure is final for the caller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            RouterErrorKind::ServiceUnavailable
                | RouterErrorKind::Internal
                | RouterErrorKind::ConsistencyViolation
        )
    }

    /// True for write timeouts whose payload may have been applied.
    pub fn maybe_executed(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout {
                maybe_executed: true,
                ..
            }
        )
    }

    /// Whether this failure should mark the replica that produced it.
    pub fn marks_replica_unhealthy(&self) -> bool {
        matches!(
            self.kind(),
            RouterErrorKind::Gone | RouterErrorKind::RequestTimeout
        )
    }
}
