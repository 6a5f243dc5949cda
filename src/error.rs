//! Error types for calink operations.

use thiserror::Error;

/// Errors that can occur while reconciling project/event links.
///
/// Recoverable conditions (an empty or truncated recurrence expansion, a
/// missing sibling on a read path) are modeled as outcomes, not errors;
/// everything here aborts the enclosing operation.
#[derive(Error, Debug)]
pub enum CalinkError {
    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("ICS generation error: {0}")]
    IcsGenerate(String),

    #[error("Recurrence rule error: {0}")]
    Recurrence(String),

    #[error("Calendar object not found: {0}/{1}")]
    ObjectNotFound(String, String),

    #[error("Calendar store error: {0}")]
    Store(String),

    #[error("Link repository error: {0}")]
    Repository(String),

    #[error("Unknown project: {0}")]
    UnknownProject(i64),

    #[error("Ambiguous state: {0}")]
    AmbiguousState(String),
}

/// Result type alias for calink operations.
pub type CalinkResult<T> = Result<T, CalinkError>;
