use std::time::Duration;

use chrono::Utc;
use redis_job_core::{Config, RedisJobStorage, StateData};
use tokio_util::sync::CancellationToken;

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

fn scoped_config() -> Config {
    Config::default().set_prefix(format!("{{test-{}}}:", redis_job_core::new_job_id()))
}

async fn raw_conn(storage: &RedisJobStorage) -> redis::aio::ConnectionManager {
    storage.client().get_connection_manager().await.unwrap()
}

#[tokio::test]
async fn enqueue_and_fetch() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let storage = RedisJobStorage::connect_with_config(&url, config.clone())
        .await
        .unwrap();
    let keys = redis_job_core::Keys::new(&config);
    let mut raw = raw_conn(&storage).await;

    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.add_to_queue("critical", "my-job", false).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let is_member: bool = redis::cmd("SISMEMBER")
        .arg(keys.queues())
        .arg("critical")
        .query_async(&mut raw)
        .await
        .unwrap();
    assert!(is_member);

    let head: Option<String> = redis::cmd("LINDEX")
        .arg(keys.queue("critical"))
        .arg(0)
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(head.as_deref(), Some("my-job"));

    let conn = storage.get_connection();
    let cancel = CancellationToken::new();
    let fetched = conn
        .fetch_next_job(&["critical".to_string()], &cancel)
        .await
        .unwrap();
    assert_eq!(fetched.job_id(), "my-job");
    assert_eq!(fetched.queue(), "critical");

    let dequeued_head: Option<String> = redis::cmd("LINDEX")
        .arg(keys.queue_dequeued("critical"))
        .arg(0)
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(dequeued_head.as_deref(), Some("my-job"));

    let fetched_flag: bool = redis::cmd("HEXISTS")
        .arg(keys.job("my-job"))
        .arg("Fetched")
        .query_async(&mut raw)
        .await
        .unwrap();
    assert!(fetched_flag);

    fetched.remove_from_queue().await.unwrap();

    let dequeued_len: i64 = redis::cmd("LLEN")
        .arg(keys.queue_dequeued("critical"))
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(dequeued_len, 0);

    let fetched_flag_after_ack: bool = redis::cmd("HEXISTS")
        .arg(keys.job("my-job"))
        .arg("Fetched")
        .query_async(&mut raw)
        .await
        .unwrap();
    assert!(!fetched_flag_after_ack);
}

#[tokio::test]
async fn state_history_records_a_single_entry() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config)
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;

    let state = StateData::new("Processing").with_data("Server", "s1");
    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.set_job_state("my-job", &state).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let job_state: Option<String> = redis::cmd("HGET")
        .arg(keys.job("my-job"))
        .arg("State")
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(job_state.as_deref(), Some("Processing"));

    let server: Option<String> = redis::cmd("HGET")
        .arg(keys.job_state("my-job"))
        .arg("Server")
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(server.as_deref(), Some("s1"));

    let history_len: i64 = redis::cmd("LLEN")
        .arg(keys.job_history("my-job"))
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(history_len, 1);
}

#[tokio::test]
async fn lifo_queue_fetches_most_recent_first() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config().set_lifo_queues(["bulk"]);
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config.clone())
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;

    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.add_to_queue("bulk", "j1", config.is_lifo_queue("bulk"))
        .unwrap();
    tx.add_to_queue("bulk", "j2", config.is_lifo_queue("bulk"))
        .unwrap();
    tx.commit(&mut raw).await.unwrap();

    let conn = storage.get_connection();
    let cancel = CancellationToken::new();
    let fetched = conn
        .fetch_next_job(&["bulk".to_string()], &cancel)
        .await
        .unwrap();
    assert_eq!(fetched.job_id(), "j2");
    fetched.remove_from_queue().await.unwrap();
}

#[tokio::test]
async fn history_monotonicity_across_several_states() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config)
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;

    for name in ["Enqueued", "Processing", "Succeeded"] {
        let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
        tx.add_job_state("my-job", &StateData::new(name)).unwrap();
        tx.commit(&mut raw).await.unwrap();
    }

    let history_len: i64 = redis::cmd("LLEN")
        .arg(keys.job_history("my-job"))
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(history_len, 3);
}

#[tokio::test]
async fn ttl_symmetry_between_expire_and_persist() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config)
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;

    let conn = storage.get_connection();
    let job_id = conn
        .create_expired_job(
            Default::default(),
            Default::default(),
            Utc::now(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.expire_job(&job_id, 120).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let ttl: i64 = redis::cmd("TTL")
        .arg(keys.job(&job_id))
        .query_async(&mut raw)
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 120);

    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.persist_job(&job_id).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let ttl_after_persist: i64 = redis::cmd("TTL")
        .arg(keys.job(&job_id))
        .query_async(&mut raw)
        .await
        .unwrap();
    assert_eq!(ttl_after_persist, -1);
}

#[tokio::test]
async fn set_range_in_hash_round_trips_through_get_all_entries() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config)
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;
    let conn = storage.get_connection();

    let key = keys.job("round-trip-target");
    let fields = vec![
        ("Type".to_string(), "MyApp.Jobs".to_string()),
        ("Method".to_string(), "Send".to_string()),
    ];
    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.set_range_in_hash(&key, &fields).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let entries = conn.get_all_entries_from_hash(&key).await.unwrap();
    for (k, v) in &fields {
        assert_eq!(entries.get(k), Some(v));
    }
}

#[tokio::test]
async fn queue_exclusivity_after_fetch() {
    let Some(url) = redis_url() else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };
    let config = scoped_config();
    let keys = redis_job_core::Keys::new(&config);
    let storage = RedisJobStorage::connect_with_config(&url, config)
        .await
        .unwrap();
    let mut raw = raw_conn(&storage).await;

    let mut tx = redis_job_core::WriteTransaction::new(keys.clone());
    tx.add_to_queue("q", "only-job", false).unwrap();
    tx.commit(&mut raw).await.unwrap();

    let conn = storage.get_connection();
    let cancel = CancellationToken::new();
    let fetched = conn
        .fetch_next_job(&["q".to_string()], &cancel)
        .await
        .unwrap();

    let pending: Vec<String> = redis::cmd("LRANGE")
        .arg(keys.queue("q"))
        .arg(0)
        .arg(-1)
        .query_async(&mut raw)
        .await
        .unwrap();
    let dequeued: Vec<String> = redis::cmd("LRANGE")
        .arg(keys.queue_dequeued("q"))
        .arg(0)
        .arg(-1)
        .query_async(&mut raw)
        .await
        .unwrap();

    let total_occurrences = pending.iter().filter(|id| *id == "only-job").count()
        + dequeued.iter().filter(|id| *id == "only-job").count();
    assert_eq!(total_occurrences, 1);

    fetched.remove_from_queue().await.unwrap();
}
