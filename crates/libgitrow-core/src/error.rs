use thiserror::Error;

use crate::vfs::FsError;

/// Main error type for gitrow operations
#[derive(Debug, Error)]
pub enum GitrowError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("database busy: {0}")]
    DbBusy(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("ID parse error: {0}")]
    IdParse(#[from] crate::types::ids::IdParseError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl GitrowError {
    /// Stable error code used in JSON error bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            GitrowError::InvalidArgs(_) => "invalid_args",
            GitrowError::DbBusy(_) => "db_busy",
            GitrowError::Encoding(_) => "encoding_error",
            GitrowError::Io(_) => "io_error",
            GitrowError::Sled(_) => "db_error",
            GitrowError::Json(_) => "internal_error",
            GitrowError::TomlParse(_) => "invalid_args",
            GitrowError::TomlSerialize(_) => "internal_error",
            GitrowError::IdParse(_) => "invalid_args",
            GitrowError::Fs(_) => "fs_error",
        }
    }

    /// Process exit code for binaries
    pub fn exit_code(&self) -> i32 {
        match self {
            GitrowError::InvalidArgs(_) => 2,
            GitrowError::DbBusy(_) => 5,
            GitrowError::Io(_) => 5,
            GitrowError::Sled(_) => 5,
            GitrowError::IdParse(_) => 2,
            GitrowError::Encoding(_) => 6,
            _ => 1,
        }
    }

    /// Create a DbBusy error with process info
    pub fn database_locked(details: Option<&str>) -> Self {
        let msg = match details {
            Some(d) => format!("Database is locked ({})", d),
            None => "Database is locked by another process".to_string(),
        };
        GitrowError::DbBusy(msg)
    }
}
