use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Tenant {0} has no domain or path on record")]
    OrphanedTenant(u64),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("External tool error: {tool} - {message}")]
    ExternalToolError {
        tool: String,
        message: String,
    },

    #[error("File error: {path:?} - {message}")]
    FileError {
        path: PathBuf,
        message: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

impl From<sqlx::Error> for FleetError {
    fn from(error: sqlx::Error) -> Self {
        FleetError::Store(error.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(error: serde_json::Error) -> Self {
        FleetError::SerializationError(error.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(error: anyhow::Error) -> Self {
        FleetError::UnexpectedError(error.to_string())
    }
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;
