//! Wire error types

use thiserror::Error;

/// Errors seen by a client of the gitrow server
#[derive(Error, Debug)]
pub enum WireError {
    /// Network failure or a server-side (5xx) failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing, rejected, or expired credential
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Malformed payload in a request or response
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported media type")]
    UnsupportedMediaType,

    /// Server answered with an error status
    #[error("Server rejected request [{status}]: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            WireError::Transport(_) => true,
            WireError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, WireError::Auth(_))
    }
}

impl From<reqwest::Error> for WireError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WireError::Encoding(e.to_string())
        } else {
            WireError::Transport(e.to_string())
        }
    }
}

/// Error codes used in `{ok: false, error: {code, message}}` bodies
pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const ENCODING: &str = "encoding_error";
    pub const UNSUPPORTED_MEDIA_TYPE: &str = "unsupported_media_type";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const INTERNAL: &str = "internal";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(WireError::Transport("reset".into()).is_retryable());
        assert!(WireError::Rejected { status: 503, message: String::new() }.is_retryable());
        assert!(!WireError::Rejected { status: 400, message: String::new() }.is_retryable());
        assert!(!WireError::Auth("expired".into()).is_retryable());
        assert!(!WireError::Encoding("bad base64".into()).is_retryable());
    }
}
