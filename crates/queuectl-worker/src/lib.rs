//! queuectl-worker
//!
//! The consumer side of the queue:
//! - executor: runs a claimed command under `sh -c` and classifies the outcome
//! - worker: the sequential claim → execute → report loop
//! - shutdown: SIGTERM/SIGINT handling via a cancellation token
//! - manager: spawns and supervises a group of worker processes

pub mod executor;
pub mod manager;
pub mod shutdown;
pub mod worker;

pub use executor::{ExecutionOutcome, JobExecutor, TIMEOUT_EXIT_CODE};
pub use manager::WorkerManager;
pub use shutdown::install_shutdown_handler;
pub use worker::Worker;
