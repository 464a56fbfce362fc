//! Error types for Leasehold.

use crate::validation::FieldError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(FieldError),

    #[error("Conflict: {0}")]
    Conflict(String),

    // License protocol errors
    #[error("Hardware ID mismatch for license {license_id}")]
    SecurityMismatch {
        license_id: String,
        expected: String,
        received: String,
    },

    #[error("License has expired: {0}")]
    Expired(String),

    #[error("License is suspended: {0}")]
    Suspended(String),

    #[error("License is inactive: {0}")]
    Inactive(String),

    #[error("License not provisioned: {0}")]
    NotProvisioned(String),

    // Remote execution errors
    #[error("Remote execution failed: {0}")]
    RemoteExecution(String),

    // Auth errors
    #[error("Authentication required")]
    Unauthorized,

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation(FieldError::new(field, reason))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<FieldError> for Error {
    fn from(err: FieldError) -> Self {
        Error::Validation(err)
    }
}
