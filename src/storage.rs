use std::sync::Arc;

use redis::{Client, IntoConnectionInfo};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Result, StorageError};
use crate::state_handlers::StateHandlerRegistry;
use crate::subscription::Subscription;
use crate::watchers::expired_jobs::ExpiredJobsWatcher;
use crate::watchers::fetched_jobs::FetchedJobsWatcher;

/// Owns configuration and constructs every other component, the single
/// entry point the outer scheduler depends on.
///
/// Mirrors the role `RedisStorage<T>` plays for this crate's Redis-backed
/// relatives: it holds the shared `ConnectionManager`, and every
/// [`Connection`] handed out from it is a cheap clone of that same
/// pooled, auto-reconnecting handle.
pub struct RedisJobStorage {
    conn: redis::aio::ConnectionManager,
    client: Client,
    config: Config,
    subscription: Arc<Subscription>,
}

impl RedisJobStorage {
    /// Connect to `redis_url` and start the shared subscription using
    /// the default [`Config`].
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with_config(redis_url, Config::default()).await
    }

    /// Connect to `redis_url` and start the shared subscription using a
    /// custom [`Config`]. The configured `Db` index is threaded into the
    /// connection info before the manager is built, so every command
    /// issued over it targets that database.
    pub async fn connect_with_config(redis_url: &str, config: Config) -> Result<Self> {
        let mut conn_info = redis_url.into_connection_info().map_err(StorageError::from)?;
        conn_info.redis.db = config.db();
        let client = Client::open(conn_info).map_err(StorageError::from)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(StorageError::from)?;

        let channel = crate::keys::Keys::new(&config).job_fetch_channel();
        let subscription = Subscription::start(client.clone(), channel).await?;

        Ok(Self {
            conn,
            client,
            config,
            subscription: Arc::new(subscription),
        })
    }

    /// Build a storage facade from an already-connected manager, useful
    /// for sharing one manager across several in-process collaborators.
    ///
    /// The manager may already be selecting some database, so the
    /// configured `Db` index is applied with an explicit `SELECT` rather
    /// than assumed from however the caller built it.
    pub async fn from_connection_manager(
        client: Client,
        mut conn: redis::aio::ConnectionManager,
        config: Config,
    ) -> Result<Self> {
        redis::cmd("SELECT")
            .arg(config.db())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StorageError::from)?;

        let channel = crate::keys::Keys::new(&config).job_fetch_channel();
        let subscription = Subscription::start(client.clone(), channel).await?;

        Ok(Self {
            conn,
            client,
            config,
            subscription: Arc::new(subscription),
        })
    }

    /// The configuration this storage was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying Redis client, e.g. to open another dedicated
    /// pub/sub connection.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A fresh per-worker [`Connection`] handle. Cheap — it clones the
    /// shared connection manager and the subscription handle.
    pub fn get_connection(&self) -> Connection {
        Connection::new(self.conn.clone(), self.config.clone(), self.subscription.clone())
    }

    /// Construct the Fetched-Jobs Watcher over this storage's connection
    /// and configuration.
    pub fn fetched_jobs_watcher(&self) -> FetchedJobsWatcher {
        FetchedJobsWatcher::new(self.conn.clone(), self.config.clone())
    }

    /// Construct the Expired-Jobs Watcher over this storage's connection
    /// and configuration.
    pub fn expired_jobs_watcher(&self) -> ExpiredJobsWatcher {
        ExpiredJobsWatcher::new(self.conn.clone(), self.config.clone())
    }

    /// Build the default state-handler registry (`Processing`, `Failed`,
    /// `Succeeded`, `Deleted`) sized per this storage's list caps.
    pub fn state_handlers(&self) -> StateHandlerRegistry {
        let keys = crate::keys::Keys::new(&self.config);
        StateHandlerRegistry::with_defaults(
            &keys,
            self.config.succeeded_list_size(),
            self.config.deleted_list_size(),
        )
    }
}
