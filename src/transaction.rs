use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Pipeline;

use crate::error::{Result, StorageError};
use crate::job::StateData;
use crate::keys::Keys;

/// A scoped, pipelined buffer of Redis commands, committed atomically
/// from the caller's perspective.
///
/// No command executes until [`WriteTransaction::commit`]. Operations
/// queued after a successful commit, or a second call to `commit`, are
/// rejected. Dropping the transaction without committing silently
/// discards whatever was queued — there is no implicit flush, unlike
/// the fetched-job handle's disposal-as-requeue behavior.
pub struct WriteTransaction {
    keys: Keys,
    pipe: Pipeline,
    committed: bool,
}

fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        Err(StorageError::invalid_argument(format!(
            "{what} must not be empty"
        )))
    } else {
        Ok(())
    }
}

impl WriteTransaction {
    pub fn new(keys: Keys) -> Self {
        Self {
            keys,
            pipe: redis::pipe(),
            committed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            Err(StorageError::invalid_argument(
                "transaction already committed",
            ))
        } else {
            Ok(())
        }
    }

    /// Set a TTL on `job:<id>` and its `:state`/`:history` siblings.
    pub fn expire_job(&mut self, job_id: &str, seconds: i64) -> Result<&mut Self> {
        require_non_empty(job_id, "job_id")?;
        self.ensure_open()?;
        self.pipe
            .cmd("EXPIRE")
            .arg(self.keys.job(job_id))
            .arg(seconds)
            .ignore();
        self.pipe
            .cmd("EXPIRE")
            .arg(self.keys.job_state(job_id))
            .arg(seconds)
            .ignore();
        self.pipe
            .cmd("EXPIRE")
            .arg(self.keys.job_history(job_id))
            .arg(seconds)
            .ignore();
        Ok(self)
    }

    /// Remove the TTL on `job:<id>` and its siblings, making them persistent.
    pub fn persist_job(&mut self, job_id: &str) -> Result<&mut Self> {
        require_non_empty(job_id, "job_id")?;
        self.ensure_open()?;
        for key in [
            self.keys.job(job_id),
            self.keys.job_state(job_id),
            self.keys.job_history(job_id),
        ] {
            self.pipe.cmd("PERSIST").arg(key).ignore();
        }
        Ok(self)
    }

    /// Set the current state: update `job:<id>.State`, replace `:state`,
    /// and append a history entry.
    pub fn set_job_state(&mut self, job_id: &str, state: &StateData) -> Result<&mut Self> {
        require_non_empty(job_id, "job_id")?;
        self.ensure_open()?;

        let job_key = self.keys.job(job_id);
        self.pipe.hset(&job_key, "State", &state.name).ignore();

        let state_key = self.keys.job_state(job_id);
        self.pipe.del(&state_key).ignore();
        let fields = state.to_state_hash_fields();
        if !fields.is_empty() {
            self.pipe.hset_multiple(&state_key, &fields).ignore();
        }

        self.append_history(job_id, state);
        Ok(self)
    }

    /// Append a history entry without touching the current-state snapshot.
    pub fn add_job_state(&mut self, job_id: &str, state: &StateData) -> Result<&mut Self> {
        require_non_empty(job_id, "job_id")?;
        self.ensure_open()?;
        self.append_history(job_id, state);
        Ok(self)
    }

    fn append_history(&mut self, job_id: &str, state: &StateData) {
        let history_key = self.keys.job_history(job_id);
        let entry = state.to_history_json().to_string();
        self.pipe.lpush(history_key, entry).ignore();
    }

    /// Add `queue` to the `queues` set and push `job_id` onto it —
    /// left-push for FIFO consumption, right-push when `lifo` is set —
    /// then publish a wake signal on the fetch channel.
    pub fn add_to_queue(&mut self, queue: &str, job_id: &str, lifo: bool) -> Result<&mut Self> {
        require_non_empty(queue, "queue")?;
        require_non_empty(job_id, "job_id")?;
        self.ensure_open()?;

        self.pipe.sadd(self.keys.queues(), queue).ignore();
        let queue_key = self.keys.queue(queue);
        if lifo {
            self.pipe.rpush(&queue_key, job_id).ignore();
        } else {
            self.pipe.lpush(&queue_key, job_id).ignore();
        }
        self.pipe
            .publish(self.keys.job_fetch_channel(), job_id)
            .ignore();
        Ok(self)
    }

    /// `INCRBY key 1`, with an optional TTL.
    pub fn increment_counter(&mut self, key: &str, expire_in: Option<i64>) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.incr(key, 1).ignore();
        if let Some(seconds) = expire_in {
            self.pipe.cmd("EXPIRE").arg(key).arg(seconds).ignore();
        }
        Ok(self)
    }

    /// `DECRBY key 1`, with an optional TTL.
    pub fn decrement_counter(&mut self, key: &str, expire_in: Option<i64>) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.decr(key, 1).ignore();
        if let Some(seconds) = expire_in {
            self.pipe.cmd("EXPIRE").arg(key).arg(seconds).ignore();
        }
        Ok(self)
    }

    /// Add `value` to a sorted set used as a priority-ordered set, default score 0.
    pub fn add_to_set(&mut self, key: &str, value: &str, score: f64) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        require_non_empty(value, "value")?;
        self.ensure_open()?;
        self.pipe.zadd(key, value, score).ignore();
        Ok(self)
    }

    /// Add several values to a sorted set in one round-trip.
    pub fn add_range_to_set(&mut self, key: &str, values: &[(String, f64)]) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        for (value, score) in values {
            require_non_empty(value, "value")?;
            self.pipe.zadd(key, value, *score).ignore();
        }
        Ok(self)
    }

    /// `ZREM key value`.
    pub fn remove_from_set(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        require_non_empty(value, "value")?;
        self.ensure_open()?;
        self.pipe.zrem(key, value).ignore();
        Ok(self)
    }

    /// `LPUSH key value`.
    pub fn insert_to_list(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        require_non_empty(value, "value")?;
        self.ensure_open()?;
        self.pipe.lpush(key, value).ignore();
        Ok(self)
    }

    /// `LREM key 0 value` — remove all occurrences.
    pub fn remove_from_list(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        require_non_empty(value, "value")?;
        self.ensure_open()?;
        self.pipe.lrem(key, 0, value).ignore();
        Ok(self)
    }

    /// `LTRIM key start end` — inclusive bounds.
    pub fn trim_list(&mut self, key: &str, start: isize, end: isize) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.ltrim(key, start, end).ignore();
        Ok(self)
    }

    /// `HSET key field value ...` for every pair in `fields`.
    pub fn set_range_in_hash(&mut self, key: &str, fields: &[(String, String)]) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        if !fields.is_empty() {
            self.pipe.hset_multiple(key, fields).ignore();
        }
        Ok(self)
    }

    /// `DEL key` for a hash.
    pub fn remove_hash(&mut self, key: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.del(key).ignore();
        Ok(self)
    }

    /// `DEL key` for a sorted set.
    pub fn remove_set(&mut self, key: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.del(key).ignore();
        Ok(self)
    }

    /// `EXPIRE key seconds` for a hash.
    pub fn expire_hash(&mut self, key: &str, seconds: i64) -> Result<&mut Self> {
        self.expire_any(key, seconds)
    }

    /// `EXPIRE key seconds` for a list.
    pub fn expire_list(&mut self, key: &str, seconds: i64) -> Result<&mut Self> {
        self.expire_any(key, seconds)
    }

    /// `EXPIRE key seconds` for a set.
    pub fn expire_set(&mut self, key: &str, seconds: i64) -> Result<&mut Self> {
        self.expire_any(key, seconds)
    }

    fn expire_any(&mut self, key: &str, seconds: i64) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.cmd("EXPIRE").arg(key).arg(seconds).ignore();
        Ok(self)
    }

    /// `PERSIST key` for a hash.
    pub fn persist_hash(&mut self, key: &str) -> Result<&mut Self> {
        self.persist_any(key)
    }

    /// `PERSIST key` for a list.
    pub fn persist_list(&mut self, key: &str) -> Result<&mut Self> {
        self.persist_any(key)
    }

    /// `PERSIST key` for a set.
    pub fn persist_set(&mut self, key: &str) -> Result<&mut Self> {
        self.persist_any(key)
    }

    fn persist_any(&mut self, key: &str) -> Result<&mut Self> {
        require_non_empty(key, "key")?;
        self.ensure_open()?;
        self.pipe.cmd("PERSIST").arg(key).ignore();
        Ok(self)
    }

    /// Commit every queued command as one pipelined round-trip.
    pub async fn commit(&mut self, conn: &mut ConnectionManager) -> Result<()> {
        self.ensure_open()?;
        self.pipe
            .query_async::<_, ()>(conn)
            .await
            .map_err(StorageError::from)?;
        self.committed = true;
        Ok(())
    }
}

/// Convenience: a timestamp suitable for sorted-set scores (`processing`,
/// `failed`) and stats bucket suffixes.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}
