//! queuectl-store
//!
//! The durable, transactional persistence layer of the queue: a single
//! SQLite file holding the `jobs`, `config` and `workers` tables. The store
//! is the only synchronization medium between processes; every state
//! transition is a serialized write transaction against it.
//!
//! - pool: connection options, schema management, busy-retry helper
//! - store: the [`Store`] operations (enqueue, atomic claim, transitions)
//! - control: the validated [`ControlApi`] façade the CLI talks to

pub mod control;
pub mod pool;
pub mod store;

pub use control::ControlApi;
pub use store::{StateCounts, Store};
