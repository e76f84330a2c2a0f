//! SeoPilot error taxonomy.
//!
//! One enum for the whole orchestration core. `ConcurrencyConflict` is the only
//! variant that never crosses the API boundary — the dispatcher swallows it and
//! moves on (someone else got the task).

use thiserror::Error;

/// Result alias used across all SeoPilot crates.
pub type Result<T> = std::result::Result<T, SeoPilotError>;

#[derive(Debug, Error)]
pub enum SeoPilotError {
    /// Task, schedule, or job id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad input (unregistered agent name, empty rejection reason, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested transition is not an edge of the task state machine,
    /// or the task is already in a terminal state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Compare-and-swap lost the race: stored status did not match `from`.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// External handler failed. `transient` failures are retry candidates.
    #[error("handler error: {message}")]
    Handler { transient: bool, message: String },

    /// Handler exceeded the caller-supplied timeout.
    #[error("handler timed out after {0}s")]
    Timeout(u64),

    /// Approve/reject attempted by a non-permitted actor.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Scheduler single-flight guard hit: the named job is already running.
    #[error("job '{0}' is already running")]
    AlreadyRunning(String),

    /// Configuration load/parse failure.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler database failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeoPilotError {
    /// Transient handler failure — network timeout, rate limit, 5xx.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Handler {
            transient: true,
            message: message.into(),
        }
    }

    /// Permanent handler failure — bad input, unauthorized, malformed response.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Handler {
            transient: false,
            message: message.into(),
        }
    }

    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Handler { transient: true, .. })
    }
}
