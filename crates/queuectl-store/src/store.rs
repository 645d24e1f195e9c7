//! The durable job store and its state-transition operations.
//!
//! Every mutation is a serialized write against the SQLite file. The two
//! operations that must read-then-write (`claim_next_job`, `fail_job`) run
//! inside `BEGIN IMMEDIATE` transactions so the write lock is held for the
//! whole read/update sequence; concurrent claimants from other processes
//! are strictly serialized by that lock.

use crate::pool::{self, retry_on_busy};
use queuectl_core::retry::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES};
use queuectl_core::settings::{CONFIG_KEY_BACKOFF_BASE, CONFIG_KEY_MAX_RETRIES};
use queuectl_core::{time, Job, JobId, JobSpec, JobState, QueueError, QueueResult, WorkerRegistration};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::path::Path;
use tracing::{debug, info, warn};

/// Job counts per state, for `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StateCounts {
    /// Count for a single state.
    #[must_use]
    pub const fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    /// Total number of jobs in the store.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead
    }

    fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending = count,
            JobState::Processing => self.processing = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Dead => self.dead = count,
        }
    }
}

/// SQLite-backed job store.
///
/// Cheap to clone; all clones share one connection pool. Safe to use from
/// many processes against the same file: cross-process writes serialize on
/// SQLite's write lock.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens the store at the given path, creating the file and schema if
    /// they do not exist yet.
    pub async fn open(path: &Path) -> QueueResult<Self> {
        let pool = pool::connect(path).await?;
        Ok(Self { pool })
    }

    /// Wraps an already-connected pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- jobs ----

    /// Inserts a new pending job.
    ///
    /// An explicit id that collides with an existing job fails with
    /// `DUPLICATE_ID`. `max_retries` falls back to the configured default
    /// at insert time.
    pub async fn enqueue(&self, spec: &JobSpec) -> QueueResult<Job> {
        spec.validate()?;

        let max_retries = match spec.max_retries {
            Some(value) => value,
            None => self.max_retries_default().await?,
        };
        let id = spec
            .id
            .clone()
            .map(JobId::from)
            .unwrap_or_default();
        let now = time::now();
        let now_text = time::format(now);

        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, run_at, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?4)
            "#,
        )
        .bind(id.as_str())
        .bind(&spec.command)
        .bind(i64::from(max_retries))
        .bind(&now_text)
        .execute(&self.pool)
        .await
        .map_err(|e| match QueueError::from(e) {
            QueueError::DuplicateId(_) => QueueError::DuplicateId(id.to_string()),
            other => other,
        })?;

        info!(job_id = %id, command = %spec.command, "job enqueued");

        Ok(Job {
            id,
            command: spec.command.clone(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            run_at: Some(now),
            created_at: now,
            updated_at: now,
            started_at: None,
            claimed_by: None,
            last_error: None,
        })
    }

    /// The atomic fetch-and-claim.
    ///
    /// Selects the oldest eligible job (pending, or failed with `run_at`
    /// due) and transitions it to processing, all under one exclusive
    /// write transaction. Returns `None` when no job is eligible or when
    /// the write lock stayed contended past the retry budget; the caller
    /// simply polls again.
    pub async fn claim_next_job(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        match retry_on_busy("claim_next_job", || self.try_claim(worker_id)).await {
            Ok(job) => Ok(job),
            Err(e) if e.is_busy() => {
                debug!(worker_id, "claim abandoned while the store is busy");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_claim(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result = claim_in_txn(&mut conn, worker_id).await;
        finish_txn(&mut conn, result).await
    }

    /// Transitions processing → completed.
    pub async fn complete_job(&self, id: &JobId) -> QueueResult<()> {
        let now_text = time::format(time::now());
        let done = retry_on_busy("complete_job", || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET state = 'completed', updated_at = ?1
                WHERE id = ?2 AND state = 'processing'
                "#,
            )
            .bind(&now_text)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;

        if done {
            Ok(())
        } else {
            Err(self.transition_error(id, "processing").await)
        }
    }

    /// Transitions processing → failed (retry scheduled with exponential
    /// backoff) or → dead once the incremented attempt count reaches the
    /// job's retry cap. Returns the updated job.
    pub async fn fail_job(&self, id: &JobId, error_text: &str) -> QueueResult<Job> {
        retry_on_busy("fail_job", || self.try_fail(id, error_text)).await
    }

    async fn try_fail(&self, id: &JobId, error_text: &str) -> QueueResult<Job> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result = fail_in_txn(&mut conn, id, error_text).await;
        finish_txn(&mut conn, result).await
    }

    /// Transitions dead → pending with a reset attempt counter, making the
    /// job immediately eligible again.
    pub async fn retry_from_dlq(&self, id: &JobId) -> QueueResult<Job> {
        let now_text = time::format(time::now());
        let row = retry_on_busy("retry_from_dlq", || async {
            let row = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'pending', attempts = 0, run_at = ?1, updated_at = ?1,
                    last_error = NULL
                WHERE id = ?2 AND state = 'dead'
                RETURNING *
                "#,
            )
            .bind(&now_text)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?;

        match row {
            Some(row) => {
                let job = job_from_row(&row)?;
                info!(job_id = %id, "job moved from dead letter queue back to pending");
                Ok(job)
            }
            None => Err(self.transition_error(id, "dead").await),
        }
    }

    /// Fetches a single job.
    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Lists jobs in a state, most recently updated first.
    pub async fn list_jobs(&self, state: JobState) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE state = ?1 ORDER BY updated_at DESC, id ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Job counts per state; absent states report zero.
    pub async fn counts_by_state(&self) -> QueueResult<StateCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StateCounts::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            match state.parse::<JobState>() {
                Ok(state) => counts.set(state, n as u64),
                Err(_) => warn!(state, "ignoring row with unknown state"),
            }
        }
        Ok(counts)
    }

    /// Builds the NOT_FOUND / INVALID_TRANSITION error for a conditional
    /// update that matched no row.
    async fn transition_error(&self, id: &JobId, expected: &'static str) -> QueueError {
        match self.get_job(id).await {
            Ok(Some(job)) => QueueError::invalid_transition(id, expected, job.state),
            Ok(None) => QueueError::not_found("job", id),
            Err(e) => e,
        }
    }

    // ---- config ----

    /// Reads a config value.
    pub async fn get_config(&self, key: &str) -> QueueResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Upserts a config value.
    pub async fn set_config(&self, key: &str, value: &str) -> QueueResult<()> {
        retry_on_busy("set_config", || async {
            sqlx::query(
                r#"
                INSERT INTO config (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        info!(key, value, "config updated");
        Ok(())
    }

    /// All config entries, sorted by key.
    pub async fn list_config(&self) -> QueueResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM config ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("key")?, row.try_get("value")?)))
            .collect()
    }

    /// The retry cap applied to jobs enqueued without an explicit one.
    pub async fn max_retries_default(&self) -> QueueResult<u32> {
        Ok(match self.get_config(CONFIG_KEY_MAX_RETRIES).await? {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "ignoring non-integer max_retries config");
                DEFAULT_MAX_RETRIES
            }),
            None => DEFAULT_MAX_RETRIES,
        })
    }

    /// The backoff policy derived from the persisted `backoff_base`.
    pub async fn backoff_policy(&self) -> QueueResult<BackoffPolicy> {
        let base = match self.get_config(CONFIG_KEY_BACKOFF_BASE).await? {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "ignoring non-integer backoff_base config");
                DEFAULT_BACKOFF_BASE
            }),
            None => DEFAULT_BACKOFF_BASE,
        };
        Ok(BackoffPolicy::new(base))
    }

    // ---- workers ----

    /// Records a worker registration, replacing any stale row for the id.
    pub async fn register_worker(&self, worker_id: &str, pid: u32) -> QueueResult<()> {
        let now_text = time::format(time::now());
        retry_on_busy("register_worker", || async {
            sqlx::query(
                "INSERT OR REPLACE INTO workers (worker_id, pid, started_at) VALUES (?1, ?2, ?3)",
            )
            .bind(worker_id)
            .bind(i64::from(pid))
            .bind(&now_text)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Removes a worker registration.
    pub async fn unregister_worker(&self, worker_id: &str) -> QueueResult<()> {
        retry_on_busy("unregister_worker", || async {
            sqlx::query("DELETE FROM workers WHERE worker_id = ?1")
                .bind(worker_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// All registered workers, oldest first.
    pub async fn list_workers(&self) -> QueueResult<Vec<WorkerRegistration>> {
        let rows = sqlx::query(
            "SELECT worker_id, pid, started_at FROM workers ORDER BY started_at ASC, worker_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let started_at: String = row.try_get("started_at")?;
                Ok(WorkerRegistration {
                    worker_id: row.try_get("worker_id")?,
                    pid: row.try_get::<i64, _>("pid")? as u32,
                    started_at: time::parse(&started_at)?,
                })
            })
            .collect()
    }
}

/// Select-then-update claim, run while the write lock is held.
async fn claim_in_txn(conn: &mut SqliteConnection, worker_id: &str) -> QueueResult<Option<Job>> {
    let now_text = time::format(time::now());

    let candidate: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM jobs
        WHERE state = 'pending'
           OR (state = 'failed' AND run_at IS NOT NULL AND run_at <= ?1)
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(&now_text)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(id) = candidate else {
        return Ok(None);
    };

    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'processing', started_at = ?1, updated_at = ?1, claimed_by = ?2
        WHERE id = ?3
        RETURNING *
        "#,
    )
    .bind(&now_text)
    .bind(worker_id)
    .bind(&id)
    .fetch_one(&mut *conn)
    .await?;

    let job = job_from_row(&row)?;
    debug!(job_id = %job.id, worker_id, "job claimed");
    Ok(Some(job))
}

/// Failure bookkeeping, run while the write lock is held: increments the
/// attempt counter, then either schedules a retry or parks the job in the
/// dead letter queue.
async fn fail_in_txn(
    conn: &mut SqliteConnection,
    id: &JobId,
    error_text: &str,
) -> QueueResult<Job> {
    let current = sqlx::query("SELECT state, attempts, max_retries FROM jobs WHERE id = ?1")
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(current) = current else {
        return Err(QueueError::not_found("job", id));
    };

    let state: String = current.try_get("state")?;
    if state != JobState::Processing.as_str() {
        return Err(QueueError::invalid_transition(id, "processing", state));
    }

    let attempts = current.try_get::<i64, _>("attempts")? as u32 + 1;
    let max_retries = current.try_get::<i64, _>("max_retries")? as u32;
    let now = time::now();
    let now_text = time::format(now);

    let row = if attempts >= max_retries {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead', attempts = ?2, run_at = NULL, last_error = ?3, updated_at = ?4
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(i64::from(attempts))
        .bind(error_text)
        .bind(&now_text)
        .fetch_one(&mut *conn)
        .await?
    } else {
        let base: u32 = match config_value_in_txn(conn, CONFIG_KEY_BACKOFF_BASE).await? {
            Some(raw) => raw.parse().unwrap_or(DEFAULT_BACKOFF_BASE),
            None => DEFAULT_BACKOFF_BASE,
        };
        let run_at = now + BackoffPolicy::new(base).delay_for_attempt(attempts);

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed', attempts = ?2, run_at = ?3, last_error = ?4, updated_at = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(i64::from(attempts))
        .bind(time::format(run_at))
        .bind(error_text)
        .bind(&now_text)
        .fetch_one(&mut *conn)
        .await?
    };

    job_from_row(&row)
}

async fn config_value_in_txn(
    conn: &mut SqliteConnection,
    key: &str,
) -> QueueResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

/// Commits on success, rolls back on error.
async fn finish_txn<T>(conn: &mut SqliteConnection, result: QueueResult<T>) -> QueueResult<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

/// Maps a `jobs` row to the domain entity.
fn job_from_row(row: &SqliteRow) -> QueueResult<Job> {
    let parse_opt = |value: Option<String>| -> QueueResult<Option<chrono::DateTime<chrono::Utc>>> {
        value.as_deref().map(time::parse).transpose()
    };

    let state: String = row.try_get("state")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: JobId::from(row.try_get::<String, _>("id")?),
        command: row.try_get("command")?,
        state: state.parse::<JobState>().map_err(|_| {
            QueueError::corrupt(format!("unknown job state '{state}' in jobs table"))
        })?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        run_at: parse_opt(row.try_get("run_at")?)?,
        created_at: time::parse(&created_at)?,
        updated_at: time::parse(&updated_at)?,
        started_at: parse_opt(row.try_get("started_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        last_error: row.try_get("last_error")?,
    })
}
