//! Error types for the CLI

use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] tenantflow_config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] tenantflow_core::CoreError),

    #[error("Credential error: {0}")]
    Credential(#[from] tenantflow_store::CredentialError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] tenantflow_store::CipherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("General error: {0}")]
    General(String),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::General(format!("{:#}", err))
    }
}

impl From<tenantflow_store::StoreError> for CliError {
    fn from(err: tenantflow_store::StoreError) -> Self {
        Self::Store(err.into())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
