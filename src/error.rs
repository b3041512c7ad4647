//! Error taxonomy shared by the verification endpoint and the consumer.
//!
//! Every variant maps to one HTTP status so handlers can reply without matching on
//! message text. None of these errors are fatal to the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed input. No state was mutated.
    #[error("{0}")]
    Validation(String),
    /// Unknown code, session, identity or key.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The TTL elapsed. The associated state has been removed.
    #[error("expired")]
    Expired,
    /// Duplicate identity or key.
    #[error("{0}")]
    Conflict(String),
    /// The verification endpoint could not be reached or replied with garbage.
    /// Nothing is retried; the caller polls again.
    #[error("verification service unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The recovered key is not registered to the claimed identity.
    #[error("public key does not belong to this account")]
    KeyMismatch,
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Expired => StatusCode::GONE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::KeyMismatch => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Internal(message) = &self {
            error!("internal error: {message}");
        }
        let body = json!({
            "success": false,
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
