use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::requeue_job;
use crate::error::{Result, StorageError};
use crate::keys::Keys;
use crate::lock::DistributedLock;

/// Periodic component that re-queues jobs whose workers died mid-flight.
///
/// For every queue, it locks the queue's `:dequeued` list (so only one
/// watcher instance compacts it at a time), then inspects every
/// in-flight job's `Fetched`/`Checked` hash fields to decide whether the
/// worker holding it has gone silent past its budget.
pub struct FetchedJobsWatcher {
    conn: ConnectionManager,
    keys: Keys,
    config: Config,
}

impl FetchedJobsWatcher {
    pub fn new(conn: ConnectionManager, config: Config) -> Self {
        let keys = Keys::new(&config);
        Self { conn, keys, config }
    }

    /// Run until `cancel` fires, sleeping `SleepTimeout` between cycles.
    pub async fn execute(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once().await {
                warn!("fetched-jobs watcher cycle failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sleep_timeout()) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// Run a single sweep across every known queue. Exposed for tests and
    /// for callers that want to drive the cadence themselves.
    pub async fn run_once(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let queues: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys.queues())
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        for queue in queues {
            match self.sweep_queue(&queue).await {
                Ok(recovered) if recovered > 0 => {
                    info!("recovered {recovered} job(s) from queue {queue}")
                }
                Ok(_) => {}
                Err(StorageError::LockTimeout { .. }) => {
                    debug!("another instance holds the dequeue lock for {queue}; skipping");
                }
                Err(e) => warn!("failed to sweep queue {queue}: {e}"),
            }
        }

        Ok(())
    }

    async fn sweep_queue(&self, queue: &str) -> Result<usize> {
        let lock_resource = self.keys.queue_dequeued_lock(queue);
        let lock = DistributedLock::acquire(
            self.conn.clone(),
            lock_resource,
            self.config.fetched_lock_timeout(),
        )
        .await?;

        let dequeued_key = self.keys.queue_dequeued(queue);
        let mut conn = self.conn.clone();
        let job_ids: Vec<String> = redis::cmd("LRANGE")
            .arg(&dequeued_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        let mut recovered = 0usize;
        for job_id in job_ids {
            if self.process_job(queue, &job_id).await? {
                recovered += 1;
            }
        }

        lock.release().await?;
        Ok(recovered)
    }

    async fn process_job(&self, queue: &str, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let job_key = self.keys.job(job_id);
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&job_key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        let fetched = fields
            .get("Fetched")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let checked = fields
            .get("Checked")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let now = Utc::now();

        if fetched.is_none() && checked.is_none() {
            redis::cmd("HSET")
                .arg(&job_key)
                .arg("Checked")
                .arg(now.to_rfc3339())
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(StorageError::from)?;
            return Ok(false);
        }

        let timed_out_by_fetched = fetched
            .map(|f| now - f > chrono_duration(self.config.invisibility_timeout()))
            .unwrap_or(false);
        let timed_out_by_checked = fetched.is_none()
            && checked
                .map(|c| now - c > chrono_duration(self.config.checked_timeout()))
                .unwrap_or(false);

        if timed_out_by_fetched || timed_out_by_checked {
            requeue_job(&mut conn, &self.keys, queue, job_id).await?;
            return Ok(true);
        }

        Ok(false)
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> Option<String> {
        std::env::var("REDIS_URL").ok()
    }

    #[tokio::test]
    async fn recovers_a_job_timed_out_by_fetched_time() {
        let Some(url) = redis_url() else {
            eprintln!("skipping: REDIS_URL not set");
            return;
        };
        let client = redis::Client::open(url).unwrap();
        let conn = client.get_connection_manager().await.unwrap();

        let config = Config::default()
            .set_prefix(format!("{{test-{}}}:", crate::job::new_job_id()))
            .set_invisibility_timeout(Duration::from_secs(60 * 30));
        let keys = Keys::new(&config);
        let watcher = FetchedJobsWatcher::new(conn.clone(), config);

        let mut raw = conn.clone();
        let job_id = "job-X";
        redis::cmd("SADD")
            .arg(keys.queues())
            .arg("q")
            .query_async::<_, ()>(&mut raw)
            .await
            .unwrap();
        redis::cmd("LPUSH")
            .arg(keys.queue_dequeued("q"))
            .arg(job_id)
            .query_async::<_, ()>(&mut raw)
            .await
            .unwrap();
        let stale = Utc::now() - chrono::Duration::minutes(31);
        redis::cmd("HSET")
            .arg(keys.job(job_id))
            .arg("Fetched")
            .arg(stale.to_rfc3339())
            .query_async::<_, ()>(&mut raw)
            .await
            .unwrap();

        watcher.run_once().await.unwrap();

        let dequeued_len: i64 = redis::cmd("LLEN")
            .arg(keys.queue_dequeued("q"))
            .query_async(&mut raw)
            .await
            .unwrap();
        assert_eq!(dequeued_len, 0);

        let head: Option<String> = redis::cmd("LINDEX")
            .arg(keys.queue("q"))
            .arg(0)
            .query_async(&mut raw)
            .await
            .unwrap();
        assert_eq!(head.as_deref(), Some(job_id));
    }
}
