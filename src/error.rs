//! Error types for the merge bot
//!
//! Errors come in two tiers. Recoverable errors carry a human-readable
//! reason that is posted on the merge request before the bot hands it back
//! to a human. Everything else is a defect that stops the monitoring loop of
//! the affected project.

use crate::types::MrState;
use thiserror::Error;

/// Errors that can occur while landing merge requests
#[derive(Error, Debug)]
pub enum Error {
    /// A mergeability rule was violated (recoverable)
    #[error("{0}")]
    PolicyViolation(String),

    /// A wait step ran out of time (recoverable)
    #[error("{0}")]
    Timeout(String),

    /// A tag comment could not be parsed (recoverable)
    #[error("{0}")]
    MalformedTagRequest(String),

    /// The merge API refused the merge for a known reason (recoverable)
    #[error("{0}")]
    MergeRefused(String),

    /// Someone else already merged or closed the merge request
    #[error("The merge request is already {0}!")]
    AlreadyFinished(MrState),

    /// GitLab answered with a non-success status
    #[error("GitLab API error ({status}) on {endpoint}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// API path that failed
        endpoint: String,
        /// Error message or raw response body
        body: String,
    },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unreadable configuration
    #[error("config error: {0}")]
    Config(String),

    /// Missing or rejected credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Generic platform failure
    #[error("platform error: {0}")]
    Platform(String),

    /// Internal invariant broken
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure should abort only the current merge request.
    ///
    /// Recoverable failures are turned into a comment plus unassignment;
    /// all others propagate to the project worker and terminate it.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation(_)
                | Self::Timeout(_)
                | Self::MalformedTagRequest(_)
                | Self::MergeRefused(_)
        )
    }

    /// HTTP status code of an API failure, if any
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for merge bot operations
pub type Result<T> = std::result::Result<T, Error>;
