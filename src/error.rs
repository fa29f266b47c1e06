//! Hub error taxonomy
//!
//! Client mistakes reject immediately with no side effects; backend failures
//! stay scoped to a single persona and are reported inline rather than
//! failing the request; store bookkeeping errors are swallowed at the call
//! site and never reach this type.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("text is required")]
    MissingText,

    #[error("Retrieval store is unavailable (FTS5 not enabled in SQLite)")]
    RetrievalUnavailable,

    #[error("Retrieval doc too large (chars={chars} > max={max})")]
    DocTooLarge { chars: usize, max: usize },

    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    NotConfigured(String),

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownPersona(_) | Self::MissingText | Self::RetrievalUnavailable => {
                StatusCode::BAD_REQUEST
            }
            Self::DocTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotConfigured(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", detail);
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
