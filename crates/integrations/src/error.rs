//! Integration call error types.

use thiserror::Error;

/// Errors that can occur while calling an external integration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntegrationError {
    /// Credentials are registered but no live adapter exists for the integration.
    #[error("No live adapter registered for integration: {0}")]
    AdapterNotFound(String),

    /// The external call failed.
    #[error("Integration call failed: {0}")]
    CallFailed(String),

    /// The call did not finish within the configured timeout.
    #[error("Integration call timed out after {0} ms")]
    Timeout(u64),

    /// The execution was cancelled before or during the call.
    #[error("Integration call cancelled")]
    Cancelled,

    /// Credentials were present but unusable.
    #[error("Credential error: {0}")]
    Credentials(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl IntegrationError {
    /// Returns true if the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IntegrationError::Timeout(_))
    }

    /// Returns true if the error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IntegrationError::Cancelled)
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(e: serde_json::Error) -> Self {
        IntegrationError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntegrationError::AdapterNotFound("stripe".to_string());
        assert_eq!(err.to_string(), "No live adapter registered for integration: stripe");

        let err = IntegrationError::Timeout(250);
        assert_eq!(err.to_string(), "Integration call timed out after 250 ms");
    }

    #[test]
    fn test_error_kinds() {
        assert!(IntegrationError::Timeout(1).is_timeout());
        assert!(IntegrationError::Cancelled.is_cancelled());
        assert!(!IntegrationError::CallFailed("x".into()).is_timeout());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: IntegrationError = json_err.into();
        assert!(matches!(err, IntegrationError::Json(_)));
    }
}
