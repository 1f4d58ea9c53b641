use libgitrow_core::FsError;
use thiserror::Error;

/// Errors that can occur during pack and object operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fs(#[from] FsError),

    /// Malformed pack bytes: bad header, truncated entry, checksum mismatch
    #[error("Invalid pack: {0}")]
    InvalidPack(String),

    #[error("Invalid object {oid}: {reason}")]
    InvalidObject { oid: String, reason: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),
}

impl GitError {
    pub(crate) fn invalid_pack(reason: impl Into<String>) -> Self {
        GitError::InvalidPack(reason.into())
    }

    /// True for errors caused by the bytes themselves rather than the environment
    pub fn is_encoding(&self) -> bool {
        matches!(self, GitError::InvalidPack(_) | GitError::InvalidObject { .. })
    }
}
