use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZanzibarError {
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Namespace version not found: {namespace} v{version}")]
    VersionNotFound { namespace: String, version: u64 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Namespace version conflict: {0}")]
    VersionConflict(String),

    #[error("Authorization check exceeded its deadline")]
    DeadlineExceeded,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Coarse classification used by callers to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Forbidden,
    Internal,
}

impl ZanzibarError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ZanzibarError::InvalidObject(_)
            | ZanzibarError::InvalidUser(_)
            | ZanzibarError::InvalidRelation(_)
            | ZanzibarError::InvalidNamespace(_)
            | ZanzibarError::ValidationError(_) => ErrorCategory::Validation,
            ZanzibarError::NamespaceNotFound(_) | ZanzibarError::VersionNotFound { .. } => {
                ErrorCategory::NotFound
            }
            ZanzibarError::Forbidden(_) => ErrorCategory::Forbidden,
            ZanzibarError::VersionConflict(_)
            | ZanzibarError::DeadlineExceeded
            | ZanzibarError::StorageError(_)
            | ZanzibarError::CacheError(_)
            | ZanzibarError::SerializationError(_)
            | ZanzibarError::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

impl From<sled::Error> for ZanzibarError {
    fn from(err: sled::Error) -> Self {
        ZanzibarError::StorageError(err.to_string())
    }
}

impl From<redis::RedisError> for ZanzibarError {
    fn from(err: redis::RedisError) -> Self {
        ZanzibarError::CacheError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ZanzibarError>;
