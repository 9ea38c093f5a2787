//! Error types for roster-sync.

use std::path::PathBuf;

use thiserror::Error;

use roster_core::error::{ConfigError, StoreError};

/// Failures fetching or decoding the authoritative roster.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport failure or non-success HTTP status.
    #[error("roster feed request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    /// I/O failure reading a file feed or an HTTP body, with location.
    #[error("I/O error reading roster feed at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// The payload is not a roster.
    #[error("malformed roster payload from {location}: {reason}")]
    Malformed { location: String, reason: String },
}

/// All errors that can arise from a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The authoritative snapshot could not be fetched; the pass aborted
    /// before planning.
    #[error("failed to fetch authoritative roster: {0}")]
    Feed(#[from] FeedError),

    /// The local snapshot could not be loaded; the pass aborted before
    /// planning.
    #[error("failed to load local roster: {0}")]
    LocalSnapshot(#[source] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Another pass holds the pass lock.
    #[error("another roster pass is running (lock held at {})", path.display())]
    PassInProgress { path: PathBuf },

    #[error("failed to take pass lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Whether the pass aborted because a snapshot was unavailable.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, SyncError::Feed(_) | SyncError::LocalSnapshot(_))
    }
}

pub(crate) fn feed_io_err(location: impl Into<PathBuf>, source: std::io::Error) -> FeedError {
    FeedError::Io {
        location: location.into().display().to_string(),
        source,
    }
}
