//! Process settings and persisted configuration keys.
//!
//! Two configuration surfaces exist:
//! - [`Settings`]: per-process knobs resolved once at startup (database
//!   path from the environment, poll interval, optional job timeout).
//! - the persisted `config` table in the store, holding the queue-wide
//!   `max_retries` and `backoff_base` values that apply at enqueue and
//!   failure time.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the backing database file.
pub const ENV_DB_PATH: &str = "QUEUECTL_DB_PATH";

/// Database file used when [`ENV_DB_PATH`] is unset.
pub const DEFAULT_DB_PATH: &str = "./queue.db";

/// Persisted config key: default retry cap for new jobs.
pub const CONFIG_KEY_MAX_RETRIES: &str = "max_retries";

/// Persisted config key: base of the exponential backoff formula.
pub const CONFIG_KEY_BACKOFF_BASE: &str = "backoff_base";

/// The keys `config set` accepts.
pub const RECOGNIZED_CONFIG_KEYS: [&str; 2] = [CONFIG_KEY_MAX_RETRIES, CONFIG_KEY_BACKOFF_BASE];

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-process settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the backing SQLite file. Parent directories must exist.
    pub db_path: PathBuf,

    /// How long an idle worker sleeps between claim attempts.
    pub poll_interval: Duration,

    /// Optional per-job execution timeout. `None` lets commands run
    /// indefinitely.
    pub job_timeout: Option<Duration>,
}

impl Settings {
    /// Resolves settings from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let db_path = std::env::var(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        Self {
            db_path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: None,
        }
    }

    /// Overrides the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Overrides the job timeout.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Overrides the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.db_path, PathBuf::from("./queue.db"));
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert!(settings.job_timeout.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let settings = Settings::default()
            .with_db_path("/tmp/other.db")
            .with_job_timeout(Some(Duration::from_secs(30)))
            .with_poll_interval(Duration::from_millis(50));
        assert_eq!(settings.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(settings.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn recognized_keys() {
        assert!(RECOGNIZED_CONFIG_KEYS.contains(&"max_retries"));
        assert!(RECOGNIZED_CONFIG_KEYS.contains(&"backoff_base"));
    }
}
