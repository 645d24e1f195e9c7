//! Unified error types for the queue engine.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the scheduling engine and surfaced through the CLI.
///
/// Execution failures (a command exiting non-zero) are deliberately *not*
/// represented here: they are normal outcomes that drive the retry state
/// machine, not control-plane errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Malformed input: bad JSON, empty command, unknown state, bad config value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An enqueue collided with an existing job id.
    #[error("Duplicate job id: {0}")]
    DuplicateId(String),

    /// A referenced resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// A state transition was requested from the wrong state.
    #[error("Invalid transition for job {job_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        job_id: String,
        expected: &'static str,
        actual: String,
    },

    /// The store's write lock could not be acquired within the retry budget.
    ///
    /// Workers treat this as "no job available" and resume polling; it is
    /// never propagated to the CLI.
    #[error("Store busy: {0}")]
    Busy(String),

    /// The database contents are unreadable: a malformed file or a row
    /// that no longer parses. Fatal to workers and the CLI.
    #[error("Store corrupt: {0}")]
    Corrupt(String),

    /// The store is unreachable. Fatal to workers and the CLI.
    #[error("Store error: {0}")]
    Store(String),
}

impl QueueError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a not-found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource: &'static str, id: T) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates an invalid-transition error.
    #[must_use]
    pub fn invalid_transition<I, A>(job_id: I, expected: &'static str, actual: A) -> Self
    where
        I: ToString,
        A: ToString,
    {
        Self::InvalidTransition {
            job_id: job_id.to_string(),
            expected,
            actual: actual.to_string(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corrupt<T: Into<String>>(message: T) -> Self {
        Self::Corrupt(message.into())
    }

    /// Creates a store error.
    #[must_use]
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store(message.into())
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Busy(_) => "STORE_BUSY",
            Self::Corrupt(_) => "STORE_CORRUPT",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Returns the process exit code the CLI uses for this error.
    ///
    /// `1` for user errors, `2` for operational errors.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::DuplicateId(_)
            | Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::Busy(_)
            | Self::Corrupt(_)
            | Self::Store(_) => 2,
        }
    }

    /// True if the error only means the write lock was contended.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    return Self::DuplicateId(db.message().to_string());
                }
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6) mean write contention;
                // SQLITE_CORRUPT (11) and SQLITE_NOTADB (26) mean a bad file.
                let code = db.code();
                let message = db.message();
                if matches!(code.as_deref(), Some("5" | "6"))
                    || message.contains("database is locked")
                    || message.contains("database table is locked")
                {
                    return Self::Busy(message.to_string());
                }
                if matches!(code.as_deref(), Some("11" | "26"))
                    || message.contains("malformed")
                    || message.contains("not a database")
                {
                    return Self::Corrupt(message.to_string());
                }
                Self::Store(err.to_string())
            }
            sqlx::Error::PoolTimedOut => Self::Busy("connection pool timed out".to_string()),
            _ => Self::Store(err.to_string()),
        }
    }
}
