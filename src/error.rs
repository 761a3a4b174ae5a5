//! Error taxonomy for adapters, the store, refresh ticks and the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Failure of a single adapter call. Recovered locally by the orchestrator:
/// the source contributes nothing for that tick.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{source_name} returned status {status}")]
    Status { source_name: &'static str, status: u16 },
    #[error("{0}: access token rejected")]
    Auth(&'static str),
    #[error("missing query parameter `{0}`")]
    MissingParam(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("credentials not configured: {0}")]
    Credentials(&'static str),
    #[error("{source_name} does not support {capability}")]
    Unsupported {
        source_name: String,
        capability: &'static str,
    },
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("no adapter registered for `{0}`")]
    UnknownSource(String),
}

/// Persistence failure. Fatal for the current tick.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("index {0} not found")]
    IndexNotFound(u64),
    #[error("market {0} not found")]
    MarketNotFound(u64),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Client-visible error for the HTTP surface.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IndexNotFound(_) | StoreError::MarketNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::Store(s) => s.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
