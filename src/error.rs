use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("request timed out")]
    Timeout,
    #[error("API error: {status}")]
    HttpStatus { status: u16 },
    #[error("{message}")]
    ProviderPayload { message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stored data is corrupt: {0}")]
    StorageCorrupt(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("cache key {key} already holds a value of a different type")]
    CacheTypeMismatch { key: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn payload<T: Into<String>>(msg: T) -> Self {
        AppError::ProviderPayload {
            message: msg.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Timeout => ErrorKind::Timeout,
            AppError::HttpStatus { status } => ErrorKind::HttpStatus(*status),
            AppError::ProviderPayload { .. } => ErrorKind::ProviderPayload,
            AppError::Network(_) => ErrorKind::Network,
            AppError::StorageCorrupt(_) => ErrorKind::StorageCorrupt,
            AppError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}

/// Coarse classification of a failure, kept alongside the message once the
/// original error has been flattened into an [`ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    HttpStatus(u16),
    ProviderPayload,
    Network,
    StorageCorrupt,
    Cancelled,
    Internal,
}

/// Clonable error snapshot stored in cache entries and handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AppError> for ErrorInfo {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<AppError> for ErrorInfo {
    fn from(err: AppError) -> Self {
        ErrorInfo::from(&err)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
