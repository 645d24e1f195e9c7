//! Worker registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row in the `workers` table.
///
/// Created when a worker starts and removed on graceful shutdown. A
/// force-killed worker leaves its row behind; `worker stop` prunes rows
/// whose pid no longer exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    /// Unique worker identifier.
    pub worker_id: String,

    /// OS process id, used to deliver shutdown signals.
    pub pid: u32,

    /// When the worker registered.
    pub started_at: DateTime<Utc>,
}
