//! Job entity and state machine.

use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique job identifier.
///
/// Clients may supply their own id at enqueue time; otherwise a random
/// UUID is generated and rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of job states.
///
/// `Completed` and `Dead` are terminal; a job in either state is never
/// claimed again. States are persisted as lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its first claim.
    Pending,
    /// Claimed by a worker and executing.
    Processing,
    /// Finished with exit code 0.
    Completed,
    /// Failed and scheduled for a retry at `run_at`.
    Failed,
    /// Retries exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    /// All states, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// Returns the persisted lowercase form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// True for states that are never left again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::validation(format!(
                "unknown job state '{other}' (expected one of: pending, processing, completed, failed, dead)"
            ))),
        }
    }
}

/// A queued shell command plus its scheduling metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier, unique across the store.
    pub id: JobId,

    /// The command string handed to the executor. Opaque to the engine.
    pub command: String,

    /// Current lifecycle state.
    pub state: JobState,

    /// Number of failed execution attempts so far.
    pub attempts: u32,

    /// Per-job retry cap, fixed at enqueue time.
    pub max_retries: u32,

    /// Earliest time the job is eligible for a claim. `None` for terminal jobs.
    pub run_at: Option<DateTime<Utc>>,

    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the job last changed state.
    pub updated_at: DateTime<Utc>,

    /// When the current (or last) execution started.
    pub started_at: Option<DateTime<Utc>>,

    /// Worker that claimed the current (or last) execution.
    pub claimed_by: Option<String>,

    /// Short description of the last failure (exit code, stderr tail).
    pub last_error: Option<String>,
}

impl Job {
    /// True once the job can never run again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Client-supplied job specification, as accepted by `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// The shell command to run. Required, non-empty.
    pub command: String,

    /// Optional explicit job id. Collisions are rejected.
    #[serde(default)]
    pub id: Option<String>,

    /// Optional per-job retry cap; the configured default applies otherwise.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobSpec {
    /// Creates a spec with just a command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: None,
            max_retries: None,
        }
    }

    /// Checks the spec for well-formedness.
    pub fn validate(&self) -> QueueResult<()> {
        if self.command.trim().is_empty() {
            return Err(QueueError::validation("'command' must be a non-empty string"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(QueueError::validation("'id' must be non-empty when given"));
            }
        }
        Ok(())
    }
}
