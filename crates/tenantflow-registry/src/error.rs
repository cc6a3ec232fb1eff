//! Error types for the registry system

use std::fmt;
use tenantflow_store::{CipherError, CredentialError};
use thiserror::Error;

/// One schema violation: where in the input, and what is wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the input, empty for the root
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Registry-specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Operation '{name}' v{version} is already registered")]
    DuplicateOperation { name: String, version: u32 },

    #[error("Operation '{name}' v{version} is not registered")]
    OperationNotFound { name: String, version: u32 },

    #[error("Invalid input schema for operation '{name}' v{version}: {reason}")]
    InvalidSchema { name: String, version: u32, reason: String },

    #[error("Input for operation '{operation}' failed validation: {}", join_violations(.violations))]
    Validation { operation: String, violations: Vec<Violation> },
}

fn join_violations(violations: &[Violation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Registry result type
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failure reported by an operation handler
#[derive(Debug, Error)]
pub enum OperationError {
    /// Transient failure; the same request may succeed later
    #[error("{0}")]
    Retryable(String),

    /// The request itself cannot succeed
    #[error("{0}")]
    Permanent(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl OperationError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether retrying the step without outside intervention can help.
    /// Expired or missing credentials need re-authentication first.
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationError::Retryable(_) => true,
            OperationError::Permanent(_) => false,
            OperationError::Credential(err) => matches!(err, CredentialError::Store(_)),
        }
    }

    pub fn is_cipher_failure(&self) -> bool {
        matches!(self, OperationError::Credential(CredentialError::Cipher(_)))
    }
}

impl From<CipherError> for OperationError {
    fn from(err: CipherError) -> Self {
        OperationError::Credential(CredentialError::Cipher(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        let missing = OperationError::Credential(CredentialError::NotFound {
            tenant_id: "acme".to_string(),
            provider: "google_ads".to_string(),
        });

        assert!(OperationError::retryable("503 from upstream").is_retryable());
        assert!(!OperationError::permanent("campaign name taken").is_retryable());
        assert!(!missing.is_retryable());
        assert!(OperationError::from(CipherError::IntegrityFailure).is_cipher_failure());
    }

    #[test]
    fn validation_message_lists_every_violation() {
        let err = RegistryError::Validation {
            operation: "send_campaign".to_string(),
            violations: vec![
                Violation { path: "/budget".to_string(), message: "-1 is less than 0".to_string() },
                Violation { path: String::new(), message: "\"name\" is a required property".to_string() },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("/budget: -1 is less than 0"));
        assert!(text.contains("(root): \"name\" is a required property"));
    }
}
