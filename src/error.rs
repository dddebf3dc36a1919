use thiserror::Error;

/// Errors surfaced by the analysis pipeline and control surface.
///
/// Only `NoInputAvailable` is fatal to a cycle. Parse failures, oracle
/// unavailability and enforcement failures are handled inside the pipeline
/// and never reach callers as errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Every configured log source was missing or unreadable.
    #[error("no readable log sources available")]
    NoInputAvailable,

    /// An analysis cycle is already running.
    #[error("an analysis cycle is already in progress")]
    CycleInProgress,

    /// Caller supplied something that does not parse as an IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Detail lookup for an analysis id that was never recorded.
    #[error("analysis {0} not found")]
    AnalysisNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
