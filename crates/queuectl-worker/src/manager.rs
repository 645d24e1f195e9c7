//! Worker process supervision.
//!
//! The manager spawns N copies of the current executable running the
//! hidden `worker run` subcommand, each with its own worker id. It only
//! manages process lifecycle: all job coordination happens through the
//! store. Dead workers are not respawned.

use crate::shutdown::install_shutdown_handler;
use crate::worker::Worker;
use queuectl_core::settings::ENV_DB_PATH;
use queuectl_core::{QueueError, QueueResult, Settings};
use queuectl_store::Store;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// A worker process started by the manager.
#[derive(Debug, Clone)]
pub struct SpawnedWorker {
    pub worker_id: String,
    pub pid: u32,
}

/// Outcome of `worker stop`.
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    /// Pids that received SIGTERM.
    pub signalled: Vec<u32>,

    /// Stale registrations removed because the pid no longer exists.
    pub pruned: Vec<u32>,
}

/// Spawns and signals a group of worker processes.
pub struct WorkerManager {
    settings: Settings,
}

impl WorkerManager {
    /// Creates a manager for the given settings.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Starts `count` detached workers and returns immediately.
    ///
    /// The children outlive this process; `worker stop` reaches them later
    /// through their store registrations.
    pub fn spawn_detached(&self, count: u32) -> QueueResult<Vec<SpawnedWorker>> {
        let exe = current_exe()?;
        let mut spawned = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let worker_id = Worker::generate_id();
            let child = std::process::Command::new(&exe)
                .args(self.worker_args(&worker_id))
                .env(ENV_DB_PATH, &self.settings.db_path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| QueueError::store(format!("failed to spawn worker process: {e}")))?;

            let pid = child.id();
            info!(worker_id = %worker_id, pid, "spawned detached worker");
            spawned.push(SpawnedWorker { worker_id, pid });
        }

        Ok(spawned)
    }

    /// Starts `count` workers and blocks until they exit.
    ///
    /// On SIGTERM/SIGINT the manager forwards SIGTERM to every child and
    /// waits for all of them; each child finishes its in-flight job before
    /// exiting. A child that dies on its own is not restarted.
    pub async fn run_foreground(&self, count: u32) -> QueueResult<()> {
        let exe = current_exe()?;
        let shutdown = install_shutdown_handler();

        let mut pids = Vec::with_capacity(count as usize);
        let mut children = JoinSet::new();

        for _ in 0..count {
            let worker_id = Worker::generate_id();
            let mut child = tokio::process::Command::new(&exe)
                .args(self.worker_args(&worker_id))
                .env(ENV_DB_PATH, &self.settings.db_path)
                .spawn()
                .map_err(|e| QueueError::store(format!("failed to spawn worker process: {e}")))?;

            let pid = child.id().unwrap_or_default();
            info!(worker_id = %worker_id, pid, "spawned worker");
            pids.push(pid);
            children.spawn(async move {
                let _ = child.wait().await;
            });
        }

        info!(count, "worker pool running in the foreground");

        loop {
            let cancelled = tokio::select! {
                _ = shutdown.cancelled() => true,
                joined = children.join_next() => {
                    if joined.is_none() {
                        info!("all workers exited");
                        return Ok(());
                    }
                    false
                }
            };

            if cancelled {
                info!(count = pids.len(), "forwarding SIGTERM to workers");
                for pid in &pids {
                    signal_terminate(*pid);
                }
                while children.join_next().await.is_some() {}
                info!("all workers shut down");
                return Ok(());
            }
        }
    }

    /// Sends SIGTERM to every registered worker.
    ///
    /// Registrations whose pid no longer exists (force-killed workers) are
    /// removed instead of signalled.
    pub async fn stop(store: &Store) -> QueueResult<StopReport> {
        let workers = store.list_workers().await?;
        let mut report = StopReport::default();

        for worker in workers {
            if signal_terminate(worker.pid) {
                info!(worker_id = %worker.worker_id, pid = worker.pid, "sent SIGTERM to worker");
                report.signalled.push(worker.pid);
            } else {
                warn!(
                    worker_id = %worker.worker_id,
                    pid = worker.pid,
                    "worker process not found, pruning stale registration"
                );
                store.unregister_worker(&worker.worker_id).await?;
                report.pruned.push(worker.pid);
            }
        }

        Ok(report)
    }

    fn worker_args(&self, worker_id: &str) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "run".to_string(),
            "--worker-id".to_string(),
            worker_id.to_string(),
        ];
        if let Some(timeout) = self.settings.job_timeout {
            args.push("--job-timeout".to_string());
            args.push(timeout.as_secs().to_string());
        }
        args
    }
}

fn current_exe() -> QueueResult<PathBuf> {
    std::env::current_exe()
        .map_err(|e| QueueError::store(format!("cannot determine current executable: {e}")))
}

/// Delivers SIGTERM through `kill(1)`, avoiding unsafe libc calls.
/// Returns false when the process does not exist.
#[cfg(unix)]
fn signal_terminate(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn worker_args_carry_identity_and_timeout() {
        let settings = Settings::default().with_job_timeout(Some(Duration::from_secs(30)));
        let manager = WorkerManager::new(settings);

        let args = manager.worker_args("worker-abc");
        assert_eq!(args[0], "worker");
        assert_eq!(args[1], "run");
        assert!(args.contains(&"--worker-id".to_string()));
        assert!(args.contains(&"worker-abc".to_string()));
        assert!(args.contains(&"--job-timeout".to_string()));
        assert!(args.contains(&"30".to_string()));
    }

    #[test]
    fn worker_args_omit_timeout_when_unset() {
        let manager = WorkerManager::new(Settings::default());
        let args = manager.worker_args("worker-abc");
        assert!(!args.contains(&"--job-timeout".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn signalling_a_nonexistent_pid_fails() {
        // Beyond any kernel's pid_max, so nothing real is ever signalled.
        assert!(!signal_terminate(u32::MAX));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_prunes_stale_registrations() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("queue.db")).await.unwrap();
        store.register_worker("worker-gone", u32::MAX).await.unwrap();

        let report = WorkerManager::stop(&store).await.unwrap();
        assert_eq!(report.pruned, vec![u32::MAX]);
        assert!(report.signalled.is_empty());
        assert!(store.list_workers().await.unwrap().is_empty());
    }
}
