//! The validated operations behind the CLI.
//!
//! Each method maps 1:1 to a [`Store`] operation, adding the input
//! validation that belongs to the control plane: JSON parsing for enqueue,
//! state-name whitelisting for listings, and key/value checks for config.

use crate::store::{StateCounts, Store};
use queuectl_core::settings::{CONFIG_KEY_BACKOFF_BASE, RECOGNIZED_CONFIG_KEYS};
use queuectl_core::{Job, JobId, JobSpec, JobState, QueueError, QueueResult, WorkerRegistration};

/// Synchronous, in-process control surface over the store.
#[derive(Debug, Clone)]
pub struct ControlApi {
    store: Store,
}

impl ControlApi {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Parses a JSON job spec and enqueues it.
    pub async fn enqueue_json(&self, raw: &str) -> QueueResult<Job> {
        let spec: JobSpec = serde_json::from_str(raw)
            .map_err(|e| QueueError::validation(format!("invalid job JSON: {e}")))?;
        self.store.enqueue(&spec).await
    }

    /// Lists jobs for a state given by name.
    pub async fn list_jobs(&self, state: &str) -> QueueResult<Vec<Job>> {
        let state: JobState = state.parse()?;
        self.store.list_jobs(state).await
    }

    /// Job counts plus the active worker registrations, for `status`.
    pub async fn status(&self) -> QueueResult<(StateCounts, Vec<WorkerRegistration>)> {
        let counts = self.store.counts_by_state().await?;
        let workers = self.store.list_workers().await?;
        Ok((counts, workers))
    }

    /// The dead letter queue.
    pub async fn list_dead(&self) -> QueueResult<Vec<Job>> {
        self.store.list_jobs(JobState::Dead).await
    }

    /// Re-queues a dead job.
    pub async fn retry_from_dlq(&self, job_id: &str) -> QueueResult<Job> {
        self.store.retry_from_dlq(&JobId::from(job_id)).await
    }

    /// Validates and upserts a config entry.
    pub async fn set_config(&self, key: &str, value: &str) -> QueueResult<()> {
        if !RECOGNIZED_CONFIG_KEYS.contains(&key) {
            return Err(QueueError::validation(format!(
                "unknown config key '{key}' (expected one of: {})",
                RECOGNIZED_CONFIG_KEYS.join(", ")
            )));
        }

        let value = value.trim();
        let parsed: u32 = value.parse().map_err(|_| {
            QueueError::validation(format!("config value for '{key}' must be a non-negative integer"))
        })?;
        if key == CONFIG_KEY_BACKOFF_BASE && parsed < 1 {
            return Err(QueueError::validation("backoff_base must be at least 1"));
        }

        self.store.set_config(key, value).await
    }

    /// Reads a config entry.
    pub async fn get_config(&self, key: &str) -> QueueResult<Option<String>> {
        self.store.get_config(key).await
    }

    /// All config entries.
    pub async fn list_config(&self) -> QueueResult<Vec<(String, String)>> {
        self.store.list_config().await
    }

    /// All registered workers.
    pub async fn list_workers(&self) -> QueueResult<Vec<WorkerRegistration>> {
        self.store.list_workers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_api() -> (TempDir, ControlApi) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("queue.db")).await.unwrap();
        (dir, ControlApi::new(store))
    }

    #[tokio::test]
    async fn enqueue_json_round_trip() {
        let (_dir, api) = test_api().await;
        let job = api
            .enqueue_json(r#"{"id":"j1","command":"echo ok"}"#)
            .await
            .unwrap();
        assert_eq!(job.id.as_str(), "j1");

        let pending = api.list_jobs("pending").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command, "echo ok");
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let (_dir, api) = test_api().await;
        let err = api.enqueue_json("{not json").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn json_without_command_is_rejected() {
        let (_dir, api) = test_api().await;
        let err = api.enqueue_json(r#"{"id":"j1"}"#).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_state_name_is_rejected() {
        let (_dir, api) = test_api().await;
        let err = api.list_jobs("sleeping").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn config_validation() {
        let (_dir, api) = test_api().await;

        let err = api.set_config("poll_interval", "5").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = api.set_config("max_retries", "three").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = api.set_config("backoff_base", "0").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        api.set_config("max_retries", "2").await.unwrap();
        api.set_config("backoff_base", "2").await.unwrap();
        assert_eq!(
            api.get_config("max_retries").await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(api.list_config().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dlq_retry_by_name() {
        let (_dir, api) = test_api().await;
        api.enqueue_json(r#"{"id":"j2","command":"exit 1","max_retries":0}"#)
            .await
            .unwrap();

        let store = api.store();
        let job = store.claim_next_job("w1").await.unwrap().unwrap();
        store.fail_job(&job.id, "exit code 1").await.unwrap();
        assert_eq!(api.list_dead().await.unwrap().len(), 1);

        let revived = api.retry_from_dlq("j2").await.unwrap();
        assert_eq!(revived.state, JobState::Pending);
        assert_eq!(revived.attempts, 0);
        assert!(api.list_dead().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_reports_counts_and_workers() {
        let (_dir, api) = test_api().await;
        api.enqueue_json(r#"{"command":"true"}"#).await.unwrap();
        api.store().register_worker("worker-x", 42).await.unwrap();

        let (counts, workers) = api.status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].pid, 42);
    }
}
