//! Certificate lifecycle error types.

use warden_common::cache::CacheError;
use warden_common::error::ErrorCode;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("{op} failed for identity {identity_id} in org {org_id}: {source}")]
    Engine {
        op: &'static str,
        org_id: String,
        identity_id: String,
        #[source]
        source: EngineError,
    },

    #[error("the organization CA cannot be revoked")]
    CaNotRevocable,

    #[error("organization CA is not initialized: {0}")]
    CaNotInitialized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid identity id: {0}")]
    InvalidId(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<&PkiError> for ErrorCode {
    fn from(e: &PkiError) -> Self {
        match e {
            PkiError::Engine { .. } => ErrorCode::EngineFailed,
            PkiError::CaNotRevocable => ErrorCode::InvalidOperation,
            PkiError::CaNotInitialized(_) => ErrorCode::CaNotInitialized,
            PkiError::NotFound(_) => ErrorCode::NotFound,
            PkiError::AlreadyExists(_) => ErrorCode::Conflict,
            PkiError::InvalidId(_) | PkiError::Parse(_) => ErrorCode::InvalidPayload,
            PkiError::InvalidName(_) => ErrorCode::InvalidName,
            PkiError::Cache(_) => ErrorCode::CacheUnavailable,
            PkiError::Io(_) => ErrorCode::IoError,
            PkiError::Internal(_) => ErrorCode::Internal,
        }
    }
}
