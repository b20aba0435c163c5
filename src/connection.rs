use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::error;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::job::{new_job_id, Invocation, JobData, StateData};
use crate::keys::Keys;
use crate::lock::DistributedLock;
use crate::subscription::Subscription;

/// Server registration payload for [`Connection::announce_server`].
#[derive(Clone, Debug, Default)]
pub struct ServerContext {
    pub worker_count: u32,
    pub queues: Vec<String>,
}

/// The per-worker handle onto the storage core.
///
/// Cheap to clone/construct repeatedly — the underlying
/// [`ConnectionManager`] is itself an auto-reconnecting, internally
/// pooled, thread-safe handle (the same pattern used for
/// `RedisStorage::get_connection` in this crate's Redis-backed
/// relatives).
#[derive(Clone)]
pub struct Connection {
    conn: ConnectionManager,
    keys: Keys,
    config: Config,
    subscription: Arc<Subscription>,
}

impl Connection {
    pub fn new(
        conn: ConnectionManager,
        config: Config,
        subscription: Arc<Subscription>,
    ) -> Self {
        let keys = Keys::new(&config);
        Self {
            conn,
            keys,
            config,
            subscription,
        }
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

    /// Generate a fresh job ID, write the merged invocation + user
    /// parameters as a hash, and set an expiry so a job that's never
    /// enqueued self-cleans.
    pub async fn create_expired_job(
        &self,
        invocation: Invocation,
        parameters: HashMap<String, String>,
        created_at: DateTime<Utc>,
        expire_in: Duration,
    ) -> Result<String> {
        let job_id = new_job_id();
        let job = JobData {
            invocation,
            created_at,
            state: None,
            fetched: None,
            checked: None,
            parameters,
            load_error: None,
        };
        let fields = job.to_hash_fields();
        let job_key = self.keys.job(&job_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.hset_multiple(&job_key, &fields).ignore();
        pipe.cmd("EXPIRE")
            .arg(&job_key)
            .arg(expire_in.as_secs() as i64)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;

        Ok(job_id)
    }

    /// Acquire a Redis-side expiring-key lock on `resource`, timing out
    /// (and releasing the budget) after `timeout`.
    pub async fn acquire_distributed_lock(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<DistributedLock> {
        Self::require_non_empty(resource, "resource")?;
        let prefixed = self.keys.prefixed(resource);
        DistributedLock::acquire(self.conn.clone(), prefixed, timeout).await
    }

    /// The core fetch protocol: iterate `queues` in caller order,
    /// `RPOPLPUSH` each into its `:dequeued` sibling, stamp `Fetched`,
    /// and return a scoped handle. If every queue is empty, block on the
    /// subscription's wake signal (bounded by `FetchTimeout`) and retry.
    pub async fn fetch_next_job(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedJob> {
        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            for queue in queues {
                if cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }

                let queue_key = self.keys.queue(queue);
                let dequeued_key = self.keys.queue_dequeued(queue);
                let mut conn = self.conn.clone();

                let job_id: Option<String> = redis::cmd("RPOPLPUSH")
                    .arg(&queue_key)
                    .arg(&dequeued_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(StorageError::from)?;

                if let Some(job_id) = job_id {
                    let now = Utc::now().to_rfc3339();
                    redis::cmd("HSET")
                        .arg(self.keys.job(&job_id))
                        .arg("Fetched")
                        .arg(&now)
                        .query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(StorageError::from)?;

                    return Ok(FetchedJob::new(
                        self.conn.clone(),
                        self.keys.clone(),
                        job_id,
                        queue.clone(),
                    ));
                }
            }

            self.subscription
                .wait_for_job(self.config.fetch_timeout(), cancel)
                .await;
        }
    }

    /// Register (or re-register) a server and the queues it serves.
    pub async fn announce_server(&self, server_id: &str, context: &ServerContext) -> Result<()> {
        Self::require_non_empty(server_id, "server_id")?;
        let now = Utc::now().to_rfc3339();
        let server_key = self.keys.server(server_id);
        let queues_key = self.keys.server_queues(server_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.sadd(self.keys.servers(), server_id).ignore();
        pipe.hset_multiple(
            &server_key,
            &[
                ("WorkerCount".to_string(), context.worker_count.to_string()),
                ("StartedAt".to_string(), now.clone()),
                ("Heartbeat".to_string(), now),
            ],
        )
        .ignore();
        pipe.del(&queues_key).ignore();
        for queue in &context.queues {
            pipe.rpush(&queues_key, queue).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Refresh a registered server's `Heartbeat` field.
    pub async fn heartbeat(&self, server_id: &str) -> Result<()> {
        Self::require_non_empty(server_id, "server_id")?;
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(self.keys.server(server_id))
            .arg("Heartbeat")
            .arg(Utc::now().to_rfc3339())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Deregister a server and its queue list.
    pub async fn remove_server(&self, server_id: &str) -> Result<()> {
        Self::require_non_empty(server_id, "server_id")?;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.srem(self.keys.servers(), server_id).ignore();
        pipe.del(self.keys.server(server_id)).ignore();
        pipe.del(self.keys.server_queues(server_id)).ignore();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Deregister every server whose `max(StartedAt, Heartbeat)` is older
    /// than `timeout`. Returns the number removed.
    pub async fn remove_timed_out_servers(&self, timeout: Duration) -> Result<usize> {
        let mut conn = self.conn.clone();
        let server_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys.servers())
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let mut removed = 0usize;

        for server_id in server_ids {
            let fields: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(self.keys.server(&server_id))
                .query_async(&mut conn)
                .await
                .map_err(StorageError::from)?;

            let started_at = fields
                .get("StartedAt")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let last_heartbeat = fields
                .get("Heartbeat")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let last_seen = match (started_at, last_heartbeat) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            let timed_out = match last_seen {
                Some(last_seen) => last_seen < cutoff,
                None => true,
            };

            if timed_out {
                self.remove_server(&server_id).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Read the full job record, or `None` if it has expired/never existed.
    pub async fn get_job_data(&self, job_id: &str) -> Result<Option<JobData>> {
        Self::require_non_empty(job_id, "job_id")?;
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job(job_id))
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(JobData::from_hash_fields(fields)))
    }

    /// Read the current-state snapshot, or `None` if absent.
    pub async fn get_state_data(&self, job_id: &str) -> Result<Option<StateData>> {
        Self::require_non_empty(job_id, "job_id")?;
        let mut conn = self.conn.clone();
        let mut fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job_state(job_id))
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let name = fields.remove("State").unwrap_or_default();
        let reason = fields.remove("Reason");
        Ok(Some(StateData {
            name,
            reason,
            created_at: Utc::now(),
            data: fields,
        }))
    }

    /// Read a single user parameter off the job hash.
    pub async fn get_job_parameter(&self, job_id: &str, name: &str) -> Result<Option<String>> {
        Self::require_non_empty(job_id, "job_id")?;
        Self::require_non_empty(name, "name")?;
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(self.keys.job(job_id))
            .arg(name)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(value)
    }

    /// Write a single user parameter onto the job hash.
    pub async fn set_job_parameter(&self, job_id: &str, name: &str, value: &str) -> Result<()> {
        Self::require_non_empty(job_id, "job_id")?;
        Self::require_non_empty(name, "name")?;
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(self.keys.job(job_id))
            .arg(name)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// `HGETALL key`, returning an empty map if the hash doesn't exist.
    pub async fn get_all_entries_from_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(fields)
    }

    /// `LRANGE key 0 -1`, returning an empty vec if the list doesn't exist.
    pub async fn get_all_items_from_list(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(items)
    }

    /// `ZRANGE key 0 -1`, returning an empty vec if the set doesn't exist.
    pub async fn get_all_items_from_set(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(items)
    }

    /// `GET key`, parsed as an integer, defaulting to 0 when absent.
    pub async fn get_counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(value.unwrap_or(0))
    }

    /// The lowest-scored member of a sorted set, if any.
    pub async fn get_first_by_lowest_score_from_set(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let mut items: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        })
    }

    /// `HLEN key`.
    pub async fn get_hash_count(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = redis::cmd("HLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(count)
    }

    /// `TTL key` — `-1` persistent, `-2` missing, otherwise seconds remaining.
    pub async fn get_hash_ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(ttl)
    }

    /// The set of registered server IDs.
    pub async fn get_servers(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys.servers())
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;
        Ok(ids)
    }

    /// A registered server's `WorkerCount`/`StartedAt`/`Heartbeat` fields.
    pub async fn get_server_data(&self, server_id: &str) -> Result<HashMap<String, String>> {
        self.get_all_entries_from_hash(&self.keys.server(server_id))
            .await
    }

    pub(crate) fn keys(&self) -> &Keys {
        &self.keys
    }

    pub(crate) fn raw_connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// A job pulled off a queue, scoped so it is either acknowledged,
/// requeued, or — if dropped without either — requeued automatically.
///
/// This is the "disposal-as-requeue" safety net: code paths that return
/// early on an unhandled error still recover the job, implemented here
/// with Rust's deterministic destructors instead of the try/finally shim
/// a garbage-collected host would need.
pub struct FetchedJob {
    conn: ConnectionManager,
    keys: Keys,
    job_id: String,
    queue: String,
    acknowledged: bool,
}

impl FetchedJob {
    fn new(conn: ConnectionManager, keys: Keys, job_id: String, queue: String) -> Self {
        Self {
            conn,
            keys,
            job_id,
            queue,
            acknowledged: false,
        }
    }

    /// The ID of the job this handle owns.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The queue this job was fetched from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Acknowledge: remove from `:dequeued` and clear `Fetched`/`Checked`.
    pub async fn remove_from_queue(mut self) -> Result<()> {
        let dequeued_key = self.keys.queue_dequeued(&self.queue);
        let job_key = self.keys.job(&self.job_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.lrem(&dequeued_key, -1, &self.job_id).ignore();
        pipe.hdel(&job_key, ("Fetched", "Checked")).ignore();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;

        self.acknowledged = true;
        Ok(())
    }

    /// Explicitly requeue: push back onto the queue, then clean up
    /// `:dequeued`.
    pub async fn requeue(mut self) -> Result<()> {
        requeue_job(&mut self.conn, &self.keys, &self.queue, &self.job_id).await?;
        self.acknowledged = true;
        Ok(())
    }
}

pub(crate) async fn requeue_job(
    conn: &mut ConnectionManager,
    keys: &Keys,
    queue: &str,
    job_id: &str,
) -> Result<()> {
    let queue_key = keys.queue(queue);
    let dequeued_key = keys.queue_dequeued(queue);
    let job_key = keys.job(job_id);

    let mut pipe = redis::pipe();
    pipe.rpush(&queue_key, job_id).ignore();
    pipe.lrem(&dequeued_key, -1, job_id).ignore();
    pipe.hdel(&job_key, ("Fetched", "Checked")).ignore();
    pipe.query_async::<_, ()>(conn)
        .await
        .map_err(StorageError::from)?;
    Ok(())
}

impl Drop for FetchedJob {
    fn drop(&mut self) {
        if self.acknowledged {
            return;
        }
        let mut conn = self.conn.clone();
        let keys = self.keys.clone();
        let queue = self.queue.clone();
        let job_id = self.job_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = requeue_job(&mut conn, &keys, &queue, &job_id).await {
                        error!("failed to requeue dropped job {job_id} on {queue}: {e}");
                    }
                });
            }
            Err(_) => {
                error!(
                    "fetched job {job_id} on {queue} dropped outside a tokio runtime; \
                     it will be recovered by the Fetched-Jobs Watcher instead"
                );
            }
        }
    }
}
