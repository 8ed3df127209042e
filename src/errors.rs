use std::io;

use reqwest::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sheet source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("transient sheet failure: {0}")]
    Transient(String),
    #[error("row {index} could not be normalized: {reason}")]
    MalformedRecord { index: usize, reason: String },
    #[error("failed to persist {target}: {reason}")]
    StoreWrite { target: String, reason: String },
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
}

impl AppError {
    /// Whether a failed sheet fetch is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transient(_) => true,
            AppError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map(is_retryable_status).unwrap_or(false)
            }
            _ => false,
        }
    }

    pub fn from_status(status: StatusCode, context: &str) -> Self {
        if is_retryable_status(status) {
            AppError::Transient(format!("{context} returned {status}"))
        } else {
            AppError::SourceUnavailable(format!("{context} returned {status}"))
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
