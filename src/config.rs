use std::collections::HashSet;
use std::time::Duration;

/// Config for a [`crate::storage::RedisJobStorage`].
///
/// Mirrors the option surface of the storage core: every row maps
/// directly to a field here, built with the same `Default` + fluent
/// setter shape used throughout this crate's Redis-backed relatives.
#[derive(Clone, Debug)]
pub struct Config {
    prefix: String,
    db: i64,
    invisibility_timeout: Duration,
    fetch_timeout: Duration,
    expiry_check_interval: Duration,
    succeeded_list_size: usize,
    deleted_list_size: usize,
    lifo_queues: HashSet<String>,
    fetched_lock_timeout: Duration,
    checked_timeout: Duration,
    sleep_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: String::from("{hangfire}:"),
            db: 0,
            invisibility_timeout: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(3 * 60),
            expiry_check_interval: Duration::from_secs(60 * 60),
            succeeded_list_size: 499,
            deleted_list_size: 499,
            lifo_queues: HashSet::new(),
            fetched_lock_timeout: Duration::from_secs(60),
            checked_timeout: Duration::from_secs(30 * 60),
            sleep_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Get the key prefix applied to every Redis key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get the configured Redis database index.
    pub fn db(&self) -> i64 {
        self.db
    }

    /// Get the per-job budget before the Fetched-Jobs Watcher reclaims it.
    pub fn invisibility_timeout(&self) -> Duration {
        self.invisibility_timeout
    }

    /// Get the max time a fetcher blocks inside `wait_for_job`.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Get the Expired-Jobs Watcher sweep cadence.
    pub fn expiry_check_interval(&self) -> Duration {
        self.expiry_check_interval
    }

    /// Get the cap for the `succeeded` list.
    pub fn succeeded_list_size(&self) -> usize {
        self.succeeded_list_size
    }

    /// Get the cap for the `deleted` list.
    pub fn deleted_list_size(&self) -> usize {
        self.deleted_list_size
    }

    /// Whether `queue` should be treated as LIFO on enqueue.
    pub fn is_lifo_queue(&self, queue: &str) -> bool {
        self.lifo_queues.contains(queue)
    }

    /// Get how long a Fetched-Jobs Watcher run may hold the per-queue lock.
    pub fn fetched_lock_timeout(&self) -> Duration {
        self.fetched_lock_timeout
    }

    /// Get the budget before an unfetched-but-checked job is reclaimed.
    pub fn checked_timeout(&self) -> Duration {
        self.checked_timeout
    }

    /// Get the Fetched-Jobs Watcher inter-cycle sleep.
    pub fn sleep_timeout(&self) -> Duration {
        self.sleep_timeout
    }

    /// Set the key prefix. Preserve braces if you want Redis Cluster
    /// hash-tag routing (the default `{hangfire}:` does this).
    pub fn set_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the Redis database index.
    pub fn set_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Set the invisibility timeout.
    pub fn set_invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.invisibility_timeout = timeout;
        self
    }

    /// Set the fetch timeout.
    pub fn set_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the expired-jobs sweep cadence.
    pub fn set_expiry_check_interval(mut self, interval: Duration) -> Self {
        self.expiry_check_interval = interval;
        self
    }

    /// Set the cap for the `succeeded` list.
    pub fn set_succeeded_list_size(mut self, size: usize) -> Self {
        self.succeeded_list_size = size;
        self
    }

    /// Set the cap for the `deleted` list.
    pub fn set_deleted_list_size(mut self, size: usize) -> Self {
        self.deleted_list_size = size;
        self
    }

    /// Replace the set of queues that should use LIFO enqueue ordering.
    pub fn set_lifo_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lifo_queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-queue dequeue-lock timeout used by the Fetched-Jobs Watcher.
    pub fn set_fetched_lock_timeout(mut self, timeout: Duration) -> Self {
        self.fetched_lock_timeout = timeout;
        self
    }

    /// Set the checked-time timeout used by the Fetched-Jobs Watcher.
    pub fn set_checked_timeout(mut self, timeout: Duration) -> Self {
        self.checked_timeout = timeout;
        self
    }

    /// Set the Fetched-Jobs Watcher inter-cycle sleep.
    pub fn set_sleep_timeout(mut self, timeout: Duration) -> Self {
        self.sleep_timeout = timeout;
        self
    }
}
