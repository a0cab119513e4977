//! Runs against a real Redis when REDIS_URL is set, otherwise every test
//! returns early.

use std::sync::Arc;

use redis::AsyncCommands;
use token_gate::gate::{DEFAULT_STORE_TIMEOUT, TokenGate};
use token_gate::rate_limit::RateLimit;
use token_gate::store::{RedisStore, TokenStore};
use token_gate::{GateError, StoreError};

fn redis_url() -> Option<String> {
    match std::env::var("REDIS_URL") {
        Ok(url) if !url.is_empty() => Some(url),
        _ => {
            eprintln!("REDIS_URL not set, skipping");
            None
        }
    }
}

// Unique names so parallel tests do not share keys
fn unique(name: &str) -> String {
    format!("token_gate_test:{}:{}", name, std::process::id())
}

async fn seed(url: &str, table: &str, tokens: &[&str]) -> redis::aio::MultiplexedConnection {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = conn.del(table).await.unwrap();
    for token in tokens {
        let _: () = conn.sadd(table, *token).await.unwrap();
    }
    conn
}

#[tokio::test]
async fn membership_checks() {
    let Some(url) = redis_url() else { return };
    let table = unique("name_list");
    let mut conn = seed(&url, &table, &["cjh"]).await;
    let store = RedisStore::connect(&url).await.unwrap();

    assert!(store.table_exists(&table).await.unwrap());
    assert!(!store.table_exists(&unique("absent")).await.unwrap());
    assert!(store.is_member(&table, "cjh").await.unwrap());
    assert!(!store.is_member(&table, "hd").await.unwrap());

    let _: () = conn.del(&table).await.unwrap();
}

#[tokio::test]
async fn window_counter_sets_expiry_once() {
    let Some(url) = redis_url() else { return };
    let key = unique("counter");
    let mut conn = seed(&url, &key, &[]).await;
    let store = RedisStore::connect(&url).await.unwrap();

    let first = store.increment_window(&key, 2, 100).await.unwrap();
    assert_eq!((first.count, first.exceeded), (1, false));
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl > 0 && ttl <= 100);

    // later hits never push the expiry back
    let _: () = conn.expire(&key, 50).await.unwrap();
    store.increment_window(&key, 2, 100).await.unwrap();
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl <= 50);

    let third = store.increment_window(&key, 2, 100).await.unwrap();
    assert_eq!((third.count, third.exceeded), (3, true));

    // out-of-range window is refused without touching the counter
    let err = store.increment_window(&key, 2, u64::MAX).await.unwrap_err();
    assert!(matches!(err, StoreError::Window(_)));
    let count: u64 = conn.get(&key).await.unwrap();
    assert_eq!(count, 3);

    let _: () = conn.del(&key).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_at_ceiling() {
    let Some(url) = redis_url() else { return };
    const N: u64 = 50;
    let table = unique("tokens");
    let token = unique("tok");
    let mut conn = seed(&url, &table, &[token.as_str()]).await;
    let _: () = conn.del(&token).await.unwrap();

    let store = Arc::new(RedisStore::connect(&url).await.unwrap());
    let limit = RateLimit {
        max_request_count: N,
        window_secs: 60,
        key_prefix: String::new(),
    };
    let gate = Arc::new(TokenGate::new(store, limit, DEFAULT_STORE_TIMEOUT));

    let path = format!("/{}/{}/x", table, token);
    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let gate = gate.clone();
            let path = path.clone();
            tokio::spawn(async move { gate.check(&path).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let err = gate.check(&path).await.unwrap_err();
    assert!(matches!(err, GateError::RateLimited { .. }));

    let _: () = conn.del(vec![table, token]).await.unwrap();
}
