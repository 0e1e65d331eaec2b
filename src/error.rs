use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Requested entity absent upstream or locally. Not retried automatically.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream metadata violates the market invariant (missing condition id
    /// or outcome token). The offending market is skipped, siblings continue.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A log does not match the expected fill event shape. Skipped and
    /// counted, never fatal to the surrounding batch.
    #[error("decode error: {0}")]
    Decode(String),

    /// Transient network/RPC failure. The identical call is safe to retry;
    /// no partial state is committed.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The RPC rejected the block range as too large. Caller must shrink
    /// the range and retry.
    #[error("range too large: {0}")]
    RangeTooLarge(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// A uniqueness or atomicity guarantee would be broken. Fatal, never
    /// swallowed.
    #[error("storage invariant violation: {0}")]
    StorageInvariant(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable kind label, printed by the indexer binary on fatal exit.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::MalformedMetadata(_) => "malformed_metadata",
            AppError::Decode(_) => "decode_error",
            AppError::SourceUnavailable(_) => "source_unavailable",
            AppError::RangeTooLarge(_) => "range_too_large",
            AppError::InvalidRange(_) => "invalid_range",
            AppError::StorageInvariant(_) => "storage_invariant_violation",
            AppError::Http(_) => "http",
            AppError::Json(_) => "json",
            AppError::Database(_) => "database",
            AppError::Migration(_) => "migration",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
        }
    }
}

/// The query API exposes not-found vs. bad-request vs. server-error and
/// nothing else; internal error text never leaves the process.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, what).into_response(),
            AppError::InvalidRange(msg) | AppError::RangeTooLarge(msg) => {
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
                .into_response(),
        }
    }
}
