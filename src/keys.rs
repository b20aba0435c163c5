use crate::config::Config;

/// The `JobFetchChannel` pub/sub channel name suffix, before prefixing.
const JOB_FETCH_CHANNEL: &str = "JobFetchChannel";

/// Builds every prefixed Redis key the storage core touches.
///
/// Centralizing key construction here keeps every command inside the
/// same hash-tag bucket (the default `{hangfire}:` prefix), a hard
/// requirement for the pipelined multi-key write transaction on Redis
/// Cluster.
#[derive(Clone, Debug)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(config: &Config) -> Self {
        Self {
            prefix: config.prefix().to_owned(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Prefix an arbitrary caller-supplied resource name, e.g. for
    /// `AcquireDistributedLock`.
    pub fn prefixed(&self, resource: &str) -> String {
        self.key(resource)
    }

    /// `P + queues` — set of all known queue names.
    pub fn queues(&self) -> String {
        self.key("queues")
    }

    /// `P + queue:<q>` — pending job IDs for queue `q`.
    pub fn queue(&self, queue: &str) -> String {
        self.key(&format!("queue:{queue}"))
    }

    /// `P + queue:<q>:dequeued` — in-flight job IDs pulled from `q`.
    pub fn queue_dequeued(&self, queue: &str) -> String {
        self.key(&format!("queue:{queue}:dequeued"))
    }

    /// `P + queue:<q>:dequeued:lock` — distributed lock for the watcher.
    pub fn queue_dequeued_lock(&self, queue: &str) -> String {
        self.key(&format!("queue:{queue}:dequeued:lock"))
    }

    /// `P + job:<id>` — job record hash.
    pub fn job(&self, id: &str) -> String {
        self.key(&format!("job:{id}"))
    }

    /// `P + job:<id>:state` — current-state snapshot hash.
    pub fn job_state(&self, id: &str) -> String {
        self.key(&format!("job:{id}:state"))
    }

    /// `P + job:<id>:history` — state-history list.
    pub fn job_history(&self, id: &str) -> String {
        self.key(&format!("job:{id}:history"))
    }

    /// `P + servers` — set of registered server IDs.
    pub fn servers(&self) -> String {
        self.key("servers")
    }

    /// `P + server:<sid>` — server record hash.
    pub fn server(&self, server_id: &str) -> String {
        self.key(&format!("server:{server_id}"))
    }

    /// `P + server:<sid>:queues` — queues a server serves.
    pub fn server_queues(&self, server_id: &str) -> String {
        self.key(&format!("server:{server_id}:queues"))
    }

    /// `P + schedule` — sorted set of scheduled jobs.
    pub fn schedule(&self) -> String {
        self.key("schedule")
    }

    /// `P + processing` — sorted set of currently processing jobs.
    pub fn processing(&self) -> String {
        self.key("processing")
    }

    /// `P + failed` — sorted set of failed jobs.
    pub fn failed(&self) -> String {
        self.key("failed")
    }

    /// `P + succeeded` — capped list of recently succeeded jobs.
    pub fn succeeded(&self) -> String {
        self.key("succeeded")
    }

    /// `P + deleted` — capped list of recently deleted jobs.
    pub fn deleted(&self) -> String {
        self.key("deleted")
    }

    /// `P + stats:succeeded` — cumulative succeeded counter.
    pub fn stats_succeeded(&self) -> String {
        self.key("stats:succeeded")
    }

    /// `P + stats:deleted` — cumulative deleted counter.
    pub fn stats_deleted(&self) -> String {
        self.key("stats:deleted")
    }

    /// `P + stats:succeeded:<suffix>` — time-series counter, e.g. `2026-07-28` or `2026-07-28-14`.
    pub fn stats_succeeded_dated(&self, suffix: &str) -> String {
        self.key(&format!("stats:succeeded:{suffix}"))
    }

    /// `P + recurring-jobs` — sorted set of recurring schedules.
    pub fn recurring_jobs(&self) -> String {
        self.key("recurring-jobs")
    }

    /// `JobFetchChannel` (prefixed) — pub/sub wake signal for fetchers.
    pub fn job_fetch_channel(&self) -> String {
        self.key(JOB_FETCH_CHANNEL)
    }
}
