use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::debug;
use redis::Client;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StorageError};

/// A pub/sub subscriber on `JobFetchChannel` that wakes idle fetchers.
///
/// Holds a one-shot latch, implemented as a `tokio::sync::Notify` rather
/// than a literal single-fire event: the publisher's notification is
/// non-blocking and coalesces, which is fine because
/// [`Subscription::wait_for_job`] always re-polls every queue after
/// waking anyway.
pub struct Subscription {
    latch: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Start the background receiver task for `channel` on a dedicated
    /// pub/sub connection.
    pub async fn start(client: Client, channel: String) -> Result<Self> {
        let latch = Arc::new(Notify::new());
        let task_latch = latch.clone();

        let mut pubsub = client.get_async_pubsub().await.map_err(StorageError::from)?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(StorageError::from)?;

        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(_msg) = stream.next().await {
                // Payload is a wake signal only; the message contents
                // (the just-enqueued job ID) are never read.
                debug!("received wake signal on {channel}");
                task_latch.notify_one();
            }
        });

        Ok(Self {
            latch,
            task: Some(task),
        })
    }

    /// Wait for either a pub/sub wake signal, the cancel token, or
    /// `timeout` — whichever fires first.
    ///
    /// A publish that happens strictly after this call is guaranteed to
    /// be observed. A publish racing a prior fetch attempt is not — that
    /// race is absorbed by `timeout`, which is why the caller's
    /// `FetchTimeout` doubles as the worst-case wake latency bound.
    pub async fn wait_for_job(&self, timeout: Duration, cancel: &CancellationToken) {
        let notified = self.latch.notified();
        tokio::select! {
            _ = notified => {}
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }

    /// Manually wake anyone waiting, used by tests and by any component
    /// that wants to nudge fetchers without going through Redis.
    pub fn notify_local(&self) {
        self.latch.notify_one();
    }

    /// Stop the receiver task. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
