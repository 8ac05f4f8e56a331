//! Feed-level error taxonomy.

use thiserror::Error;

/// Errors surfaced by feed fetching and payload handling.
///
/// The transient/permanent split drives the retry policy: transient errors
/// are retried with backoff, permanent ones are recorded against the feed
/// and the run continues.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request timed out: {url}")]
    Timeout { url: String },

    #[error("connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("malformed payload from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("unrecognized feed source: {url}")]
    UnknownSource { url: String },

    #[error("request error for {url}: {message}")]
    Request { url: String, message: String },
}

/// HTTP statuses worth retrying.
const RETRYABLE_STATUSES: &[u16] = &[408, 425, 429, 500, 502, 503, 504];

impl FeedError {
    /// Whether the fetch layer should retry this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Timeout { .. } | FeedError::Connect { .. } => true,
            FeedError::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            FeedError::Parse { .. }
            | FeedError::UnknownSource { .. }
            | FeedError::Request { .. } => false,
        }
    }

    /// The feed URL this error belongs to.
    pub fn url(&self) -> &str {
        match self {
            FeedError::Timeout { url }
            | FeedError::Connect { url, .. }
            | FeedError::Http { url, .. }
            | FeedError::Parse { url, .. }
            | FeedError::UnknownSource { url }
            | FeedError::Request { url, .. } => url,
        }
    }
}
