//! Remote helper errors

use libgitrow_core::GitrowError;
use libgitrow_git::GitError;
use libgitrow_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelperError {
    /// Malformed invocation or command; nothing was sent to the server
    #[error("usage: {0}")]
    Usage(String),

    /// No usable credential; re-authenticate and retry
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Wire(WireError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("git error: {0}")]
    Git2(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Config(#[from] GitrowError),
}

impl From<WireError> for HelperError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Auth(message) => HelperError::Auth(message),
            other => HelperError::Wire(other),
        }
    }
}

impl HelperError {
    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            HelperError::Usage(_) | HelperError::Protocol(_) => 2,
            HelperError::Auth(_) => 3,
            HelperError::Wire(_) => 4,
            HelperError::Git(_) | HelperError::Git2(_) => 5,
            HelperError::Config(e) => e.exit_code(),
            HelperError::Io(_) => 1,
        }
    }
}
