//! Error types for the security core

use thiserror::Error;

/// Errors that can occur in the security core
///
/// Authorization outcomes and untrained-model scoring are data, not
/// errors: denials come back as a `Decision` and scoring abstains with
/// `None`.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Authentication failure — surfaced with a stable code, never retried
    #[error("Authentication failed ({code}): {message}")]
    Authentication {
        /// Stable machine-readable code (e.g. "bad_credential", "rate_limited")
        code: &'static str,
        message: String,
    },

    /// Audit append/flush/query failure
    #[error("Audit error: {0}")]
    Audit(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Alert or incident not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal alert/incident state transition
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl SecurityError {
    /// Authentication error with a stable code
    pub fn authentication(code: &'static str, message: impl Into<String>) -> Self {
        Self::Authentication {
            code,
            message: message.into(),
        }
    }

    /// The stable code for authentication errors, if any
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Authentication { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result type alias for security operations
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Stable authentication error codes
pub mod codes {
    /// Credential malformed or too short
    pub const BAD_CREDENTIAL: &str = "bad_credential";
    /// Credential failed cryptographic verification
    pub const VERIFY_FAILED: &str = "verify_failed";
    /// Session invalidated or expired
    pub const INVALID_SESSION: &str = "invalid_session";
    /// Per-source rate limit exceeded
    pub const RATE_LIMITED: &str = "rate_limited";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_code() {
        let err = SecurityError::authentication(codes::RATE_LIMITED, "too many attempts");
        assert_eq!(err.code(), Some("rate_limited"));
        assert!(err.to_string().contains("rate_limited"));
    }

    #[test]
    fn test_non_authentication_has_no_code() {
        let err = SecurityError::Audit("disk full".to_string());
        assert!(err.code().is_none());
    }
}
