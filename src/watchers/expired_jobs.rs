use futures::future::join_all;
use log::{info, warn};
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::keys::Keys;
use crate::transaction::WriteTransaction;

const BATCH_SIZE: isize = 100;

/// Periodic component that garbage-collects `succeeded`/`deleted` list
/// entries whose underlying `job:<id>` hash has already expired out of
/// Redis.
///
/// Scans each list in batches of 100 from tail to head, checks
/// `EXISTS` concurrently for every ID in the batch, then removes the
/// dangling ones in a single write transaction per batch.
pub struct ExpiredJobsWatcher {
    conn: ConnectionManager,
    keys: Keys,
    config: Config,
}

impl ExpiredJobsWatcher {
    pub fn new(conn: ConnectionManager, config: Config) -> Self {
        let keys = Keys::new(&config);
        Self { conn, keys, config }
    }

    /// Run until `cancel` fires, sleeping `ExpiryCheckInterval` between cycles.
    pub async fn execute(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once().await {
                warn!("expired-jobs watcher cycle failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.expiry_check_interval()) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// Sweep both `succeeded` and `deleted` once.
    pub async fn run_once(&self) -> Result<()> {
        let succeeded_removed = self.sweep_list(&self.keys.succeeded()).await?;
        let deleted_removed = self.sweep_list(&self.keys.deleted()).await?;
        if succeeded_removed + deleted_removed > 0 {
            info!(
                "expired-jobs sweep removed {succeeded_removed} from succeeded, \
                 {deleted_removed} from deleted"
            );
        }
        Ok(())
    }

    async fn sweep_list(&self, list_key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut removed_total = 0usize;
        let mut end: isize = -1;

        loop {
            let start = end - BATCH_SIZE + 1;
            let batch: Vec<String> = redis::cmd("LRANGE")
                .arg(list_key)
                .arg(start)
                .arg(end)
                .query_async(&mut conn)
                .await?;

            if batch.is_empty() {
                break;
            }

            let checks = batch.iter().map(|id| {
                let mut conn = conn.clone();
                let job_key = self.keys.job(id);
                async move {
                    let exists: bool = redis::cmd("EXISTS")
                        .arg(&job_key)
                        .query_async(&mut conn)
                        .await
                        .unwrap_or(true);
                    exists
                }
            });
            let exists_flags = join_all(checks).await;

            let dangling: Vec<&String> = batch
                .iter()
                .zip(exists_flags.iter())
                .filter(|(_, exists)| !**exists)
                .map(|(id, _)| id)
                .collect();

            if !dangling.is_empty() {
                let mut tx = WriteTransaction::new(self.keys.clone());
                for id in &dangling {
                    tx.remove_from_list(list_key, id)?;
                }
                tx.commit(&mut conn).await?;
                removed_total += dangling.len();
            }

            if (batch.len() as isize) < BATCH_SIZE {
                break;
            }
            end = start - 1;
        }

        Ok(removed_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> Option<String> {
        std::env::var("REDIS_URL").ok()
    }

    #[tokio::test]
    async fn sweeps_dangling_entries_but_keeps_live_ones() {
        let Some(url) = redis_url() else {
            eprintln!("skipping: REDIS_URL not set");
            return;
        };
        let client = redis::Client::open(url).unwrap();
        let conn = client.get_connection_manager().await.unwrap();

        let config = Config::default().set_prefix(format!("{{test-{}}}:", crate::job::new_job_id()));
        let keys = Keys::new(&config);
        let watcher = ExpiredJobsWatcher::new(conn.clone(), config);

        let mut raw = conn.clone();
        redis::cmd("RPUSH")
            .arg(keys.succeeded())
            .arg("a")
            .arg("b")
            .query_async::<_, ()>(&mut raw)
            .await
            .unwrap();
        redis::cmd("HSET")
            .arg(keys.job("b"))
            .arg("State")
            .arg("Succeeded")
            .query_async::<_, ()>(&mut raw)
            .await
            .unwrap();

        watcher.run_once().await.unwrap();

        let len: i64 = redis::cmd("LLEN")
            .arg(keys.succeeded())
            .query_async(&mut raw)
            .await
            .unwrap();
        assert_eq!(len, 1);

        let remaining: Vec<String> = redis::cmd("LRANGE")
            .arg(keys.succeeded())
            .arg(0)
            .arg(-1)
            .query_async(&mut raw)
            .await
            .unwrap();
        assert_eq!(remaining, vec!["b".to_string()]);
    }
}
