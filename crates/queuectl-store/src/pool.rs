//! SQLite pool construction and schema management.

use queuectl_core::{QueueError, QueueResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// How long a single statement waits for SQLite's write lock before
/// reporting SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 5;

/// Opens (creating if necessary) the database file and ensures the schema.
///
/// Parent directories are not created; a missing directory surfaces as a
/// store error.
pub async fn connect(path: &Path) -> QueueResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(|e| {
            QueueError::store(format!("failed to open database at {}: {e}", path.display()))
        })?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent DDL, run on every open so any CLI invocation can be the first.
async fn init_schema(pool: &SqlitePool) -> QueueResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT PRIMARY KEY,
            command     TEXT NOT NULL,
            state       TEXT NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            run_at      TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            started_at  TEXT,
            claimed_by  TEXT,
            last_error  TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Covers the claim scan: eligible rows only.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_claim
        ON jobs (state, run_at, created_at)
        WHERE state IN ('pending', 'failed')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            worker_id  TEXT PRIMARY KEY,
            pid        INTEGER NOT NULL,
            started_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Retries a write operation a bounded number of times while the database
/// reports lock contention, sleeping with doubling delays in between.
///
/// The final busy error is returned to the caller, which decides whether
/// it is fatal (CLI transitions) or just "no job available" (claims).
pub(crate) async fn retry_on_busy<T, F, Fut>(op: &'static str, mut f: F) -> QueueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(20);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Err(e) if e.is_busy() && attempt < MAX_ATTEMPTS => {
                debug!(op, attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");

        let first = connect(&path).await.unwrap();
        first.close().await;
        // A second open against the same file must not fail on existing DDL.
        let second = connect(&path).await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM jobs")
            .fetch_one(&second)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_parent_directory_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no-such-dir").join("queue.db");

        let err = connect(&path).await.unwrap_err();
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn retry_on_busy_gives_up_after_the_budget() {
        let calls = std::cell::Cell::new(0u32);
        let result: QueueResult<()> = retry_on_busy("test", || {
            calls.set(calls.get() + 1);
            async { Err(QueueError::Busy("database is locked".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_busy());
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test]
    async fn retry_on_busy_passes_through_other_errors() {
        let calls = std::cell::Cell::new(0u32);
        let result: QueueResult<()> = retry_on_busy("test", || {
            calls.set(calls.get() + 1);
            async { Err(QueueError::store("gone")) }
        })
        .await;

        assert_eq!(result.unwrap_err().error_code(), "STORE_UNAVAILABLE");
        assert_eq!(calls.get(), 1);
    }
}
