#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
//! # redis-job-core
//! A Redis-backed storage and execution core for a distributed
//! background-job system: queues, fetch-and-lease semantics, state
//! history, distributed locking, and the watchers that recover
//! in-flight jobs after a worker crash.
//!
//! This crate is deliberately scoped to the storage layer. Scheduling
//! recurring jobs, a dashboard, and an HTTP host are all out of scope —
//! they're expected to be built on top of [`RedisJobStorage`].
//!
//! ## Example
//! ```rust,no_run
//! use redis_job_core::{Config, RedisJobStorage};
//!
//! #[tokio::main]
//! async fn main() -> redis_job_core::Result<()> {
//!     let storage = RedisJobStorage::connect("redis://127.0.0.1/").await?;
//!     let conn = storage.get_connection();
//!
//!     let job_id = conn
//!         .create_expired_job(
//!             Default::default(),
//!             Default::default(),
//!             chrono::Utc::now(),
//!             std::time::Duration::from_secs(24 * 60 * 60),
//!         )
//!         .await?;
//!
//!     println!("created {job_id}");
//!     Ok(())
//! }
//! ```

/// Configuration for a [`RedisJobStorage`].
pub mod config;
/// The per-worker handle onto the storage core, and the RAII fetched-job guard.
pub mod connection;
/// The crate's error type.
pub mod error;
/// Job and state-history data types.
pub mod job;
/// Prefixed Redis key construction.
pub mod keys;
/// The expiring-key distributed lock.
pub mod lock;
/// Secondary-index maintenance hooks fired on state transitions.
pub mod state_handlers;
/// The storage facade: the crate's single public entry point.
pub mod storage;
/// The pub/sub wake-signal latch shared by fetchers.
pub mod subscription;
/// Pipelined, atomically-committed batches of Redis writes.
pub mod transaction;
/// Background watchers that recover jobs after worker or process failure.
pub mod watchers;

pub use config::Config;
pub use connection::{Connection, FetchedJob, ServerContext};
pub use error::{Result, StorageError};
pub use job::{new_job_id, Invocation, JobData, StateData};
pub use keys::Keys;
pub use lock::DistributedLock;
pub use state_handlers::{StateHandler, StateHandlerRegistry};
pub use storage::RedisJobStorage;
pub use subscription::Subscription;
pub use transaction::WriteTransaction;
pub use watchers::expired_jobs::ExpiredJobsWatcher;
pub use watchers::fetched_jobs::FetchedJobsWatcher;
