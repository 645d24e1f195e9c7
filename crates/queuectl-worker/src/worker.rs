//! The worker loop: claim, execute, report, repeat.

use crate::executor::JobExecutor;
use queuectl_core::{Job, JobState, QueueResult};
use queuectl_store::Store;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A single job consumer.
///
/// The loop is strictly sequential: one claim, one execution, one report.
/// Parallelism comes from running several worker processes against the
/// same store; the store's claim transaction keeps them from ever holding
/// the same job.
pub struct Worker {
    id: String,
    store: Store,
    executor: JobExecutor,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    /// Creates a worker with the given identity.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        store: Store,
        executor: JobExecutor,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            executor,
            poll_interval,
            shutdown,
        }
    }

    /// Generates a fresh worker identity.
    #[must_use]
    pub fn generate_id() -> String {
        format!("worker-{}", Uuid::new_v4())
    }

    /// The worker's identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the worker until the shutdown token fires or the store fails.
    ///
    /// Registers on entry and unregisters on the way out, including the
    /// error path, so only force-killed workers leave stale rows. Store
    /// errors other than lock contention (absorbed inside the claim) are
    /// fatal and propagate to the caller.
    pub async fn run(&self) -> QueueResult<()> {
        let pid = std::process::id();
        self.store.register_worker(&self.id, pid).await?;
        info!(worker_id = %self.id, pid, "worker registered");

        let result = self.poll_loop().await;

        if let Err(e) = &result {
            error!(worker_id = %self.id, error = %e, "worker stopping after store error");
        }
        if let Err(e) = self.store.unregister_worker(&self.id).await {
            warn!(worker_id = %self.id, error = %e, "failed to unregister worker");
        }
        info!(worker_id = %self.id, "worker stopped");
        result
    }

    async fn poll_loop(&self) -> QueueResult<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.store.claim_next_job(&self.id).await? {
                Some(job) => self.process(job).await?,
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Executes one claimed job and reports the outcome.
    ///
    /// The in-flight job is never cancelled: a shutdown signal received
    /// during execution takes effect only after the outcome is recorded.
    async fn process(&self, job: Job) -> QueueResult<()> {
        info!(worker_id = %self.id, job_id = %job.id, command = %job.command, "processing job");

        let outcome = self.executor.execute(&job.command).await;
        let duration_ms = outcome.duration.as_millis() as u64;

        if outcome.success() {
            self.store.complete_job(&job.id).await?;
            info!(worker_id = %self.id, job_id = %job.id, duration_ms, "job completed");
        } else {
            let failed = self.store.fail_job(&job.id, &outcome.summary()).await?;
            match failed.state {
                JobState::Dead => warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    attempts = failed.attempts,
                    exit_code = outcome.exit_code,
                    "job exhausted its retries, moved to dead letter queue"
                ),
                _ => warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    attempts = failed.attempts,
                    exit_code = outcome.exit_code,
                    run_at = ?failed.run_at,
                    "job failed, retry scheduled"
                ),
            }
        }
        Ok(())
    }
}
