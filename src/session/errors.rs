//! Session Token Errors
//!
//! Parse errors are hard errors: a malformed token is never replaced by a
//! default. A merge of two tokens with equal versions but different region
//! sets means the account's region configuration is inconsistent.

use thiserror::Error;

/// Result type for session token operations
pub type SessionResult<T> = Result<T, SessionTokenError>;

/// Session token errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionTokenError {
    /// The string form could not be parsed
    #[error("Malformed session token '{token}': {reason}")]
    Malformed {
        /// Offending input
        token: String,
        /// What was wrong with it
        reason: String,
    },

    /// Equal versions with different region sets
    #[error("Session token region sets differ at version {version}: '{left}' vs '{right}'")]
    RegionMismatch {
        /// The shared version
        version: u64,
        /// First token
        left: String,
        /// Second token
        right: String,
    },
}

impl SessionTokenError {
    /// Create a malformed-token error.
    pub fn malformed(token: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a consistency-configuration violation rather
    /// than bad input.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::RegionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = SessionTokenError::malformed("abc", "missing global lsn");
        let text = err.to_string();
        assert!(text.contains("abc"));
        assert!(text.contains("missing global lsn"));
        assert!(!err.is_consistency_violation());
    }

    #[test]
    fn test_region_mismatch_is_violation() {
        let err = SessionTokenError::RegionMismatch {
            version: 1,
            left: "1#1#1=1".into(),
            right: "1#1#2=1".into(),
        };
        assert!(err.is_consistency_violation());
    }
}
