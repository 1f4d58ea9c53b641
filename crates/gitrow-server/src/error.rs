//! Server error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libgitrow_core::GitrowError;
use libgitrow_git::GitError;
use libgitrow_wire::error::codes;
use libgitrow_wire::ErrorBody;
use thiserror::Error;
use tracing::error;

/// Errors that fail a whole request. Per-ref failures are reported inside
/// a successful push response instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed pack or payload encoding
    #[error("{0}")]
    Encoding(String),

    #[error("unsupported content type '{0}'")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Core(#[from] GitrowError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Core(e) => match e {
                GitrowError::InvalidArgs(_) | GitrowError::IdParse(_) => StatusCode::BAD_REQUEST,
                GitrowError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Git(e) if e.is_encoding() => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Git(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => codes::INVALID_INPUT,
            StatusCode::UNAUTHORIZED => codes::UNAUTHORIZED,
            StatusCode::NOT_FOUND => codes::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY => codes::ENCODING,
            StatusCode::UNSUPPORTED_MEDIA_TYPE => codes::UNSUPPORTED_MEDIA_TYPE,
            StatusCode::PAYLOAD_TOO_LARGE => codes::PAYLOAD_TOO_LARGE,
            _ => codes::INTERNAL,
        }
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        ServerError::Internal(format!("{} lock poisoned", what))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(ErrorBody::new(self.code(), self.to_string()))).into_response()
    }
}
