//! queuectl-core
//!
//! Domain types shared by the queuectl store, worker runtime and CLI:
//! - job: the job entity, its closed state machine and the enqueue spec
//! - retry: exponential backoff arithmetic for failed jobs
//! - error: the unified error taxonomy with CLI exit-code mapping
//! - settings: process settings from the environment and persisted config keys
//! - time: the timestamp format used in the database

pub mod error;
pub mod job;
pub mod registration;
pub mod retry;
pub mod settings;
pub mod time;

pub use error::{QueueError, QueueResult};
pub use job::{Job, JobId, JobSpec, JobState};
pub use registration::WorkerRegistration;
pub use retry::BackoffPolicy;
pub use settings::Settings;
