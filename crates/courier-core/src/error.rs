use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendErrorCategory {
    /// Invalid input or request the backend refused to process.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// No progress within the allowed window.
    Timeout,
    /// Local file system failure.
    Storage,
    /// Internal backend bug or invariant break.
    Internal,
}

/// Stable backend error payload carried as data across the I/O boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct BackendError {
    /// High-level error category.
    pub category: BackendErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl BackendError {
    /// Construct a new backend error.
    pub fn new(
        category: BackendErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Build an error from the numeric status the backend attaches to error replies.
    pub fn from_status(status: i32, message: impl Into<String>) -> Self {
        Self::new(
            classify_status(status),
            format!("backend_status_{status}"),
            message,
        )
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Error recorded when a download makes no progress for longer than the timeout.
    pub fn download_timeout(stalled_for: Duration) -> Self {
        Self::new(
            BackendErrorCategory::Timeout,
            "download_timeout",
            format!("no download progress for {}s", stalled_for.as_secs()),
        )
    }
}

/// Map backend status codes to error categories.
pub fn classify_status(status: i32) -> BackendErrorCategory {
    match status {
        401 | 403 => BackendErrorCategory::Auth,
        420 | 429 => BackendErrorCategory::RateLimited,
        408 => BackendErrorCategory::Timeout,
        400..=499 => BackendErrorCategory::Config,
        500..=599 => BackendErrorCategory::Network,
        _ => BackendErrorCategory::Internal,
    }
}

/// Errors returned synchronously by UI-facing command methods.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Shutdown has begun; no further requests are accepted.
    #[error("client is stopped")]
    Stopped,
    /// The command arguments were rejected before reaching the backend.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
