//! Error taxonomy for the profiler control layer
//!
//! Every failure is reported to the caller immediately; nothing in this crate
//! retries on its own.

use thiserror::Error;

/// Errors surfaced by session, command and filter operations
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// Session start while running, or stop while not running
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Command text rejected by the engine's grammar
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Engine could not produce the requested output
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed an empty value where one is required
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    /// Engine failed for a reason other than I/O
    #[error("Engine error: {0}")]
    Engine(String),

    /// Platform cannot provide a capability the caller asked for
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type for profiler operations
pub type Result<T> = std::result::Result<T, ProfilerError>;

impl ProfilerError {
    /// True for failures the caller may retry after fixing an external condition
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Reject an empty or blank string before it reaches the engine
pub(crate) fn require_non_empty<'a>(value: &'a str, name: &'static str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(ProfilerError::MissingArgument(name));
    }
    Ok(value)
}
