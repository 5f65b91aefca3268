//! Error types for the activity feed client

use reqwest::StatusCode;

/// Errors raised while talking to the activity backend
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("{url} returned HTTP {status}")]
    Status { status: StatusCode, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(String),
}

impl FeedError {
    /// HTTP status carried by the failure, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FeedError::Status { status, .. } => Some(*status),
            FeedError::Transport(err) => err.status(),
            _ => None,
        }
    }

    /// Authentication and missing-endpoint failures stop the feed for good;
    /// everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND)
        )
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
