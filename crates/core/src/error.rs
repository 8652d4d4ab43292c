//! Error types for the grid core.

use thiserror::Error;

/// Result type alias for grid core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the grid core.
///
/// Queue business outcomes (timeout, cancellation) are deliberately *not*
/// here: the queue reports those through rejection events, never through
/// error returns.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or contradictory configuration. Fatal at startup; discovery
    /// aborts on the first one rather than building a partial slot table.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A session factory refused or failed to produce a session.
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    /// A new-session payload could not be decoded into capabilities.
    #[error("unable to decode new session payload: {0}")]
    Payload(String),

    /// The background timer worker has been stopped.
    #[error("scheduler is not running")]
    SchedulerStopped,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for errors that should abort node startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
