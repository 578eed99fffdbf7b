//! Integration tests for the Redis bulk cache and the ticker consumer.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use freshet_core::{RetryPolicy, RetryingFetcher};
use freshet_server::{
    BulkCache, RedisConfig, TickerCache, TickerOrigin, TickerSnapshot, create_redis_pool,
    ticker_key,
};
use parking_lot::Mutex;
use redis::AsyncCommands;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn bulk_cache() -> (BulkCache, deadpool_redis::Pool) {
    let url = get_redis_url().await;
    let pool = create_redis_pool(&url, &RedisConfig::default())
        .await
        .expect("redis pool");
    (BulkCache::new(pool.clone()), pool)
}

fn snapshot(symbol: &str, price: f64) -> TickerSnapshot {
    TickerSnapshot {
        symbol: symbol.to_string(),
        price,
        change_percent: 0.5,
        as_of: 1_760_000_000,
    }
}

#[tokio::test]
async fn bulk_fetch_omits_missing_keys_and_keeps_pairing() {
    let (cache, _) = bulk_cache().await;
    let ns = "scenario";
    let keys: Vec<String> = ["AAPL", "NFLX", "TSLA"]
        .iter()
        .map(|s| ticker_key(ns, s))
        .collect();

    let written = cache
        .bulk_write(
            &keys[..2],
            &[b"snap_a".to_vec(), b"snap_b".to_vec()],
            Duration::from_secs(300),
        )
        .await
        .expect("bulk write");
    assert_eq!(written, 2);

    let hits = cache.bulk_fetch(&keys).await.expect("bulk fetch");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].value, b"snap_a".to_vec());
    assert_eq!(hits[1].value, b"snap_b".to_vec());
    for hit in &hits {
        assert!(hit.ttl > Duration::from_secs(290) && hit.ttl <= Duration::from_secs(300));
    }
}

#[tokio::test]
async fn bulk_fetch_skips_keys_without_ttl() {
    let (cache, pool) = bulk_cache().await;
    let persistent = ticker_key("no-ttl", "MSFT");

    let mut conn = pool.get().await.expect("connection");
    let _: () = conn.set(&persistent, b"forever".to_vec()).await.expect("plain set");

    let hits = cache.bulk_fetch(&[persistent]).await.expect("bulk fetch");
    assert!(hits.is_empty());
}

#[tokio::test]
async fn bulk_write_applies_shared_ttl_to_every_key() {
    let (cache, pool) = bulk_cache().await;
    let keys = vec![ticker_key("ttl", "AMZN"), ticker_key("ttl", "GOOG")];

    cache
        .bulk_write(&keys, &[b"a".to_vec(), b"g".to_vec()], Duration::from_secs(120))
        .await
        .expect("bulk write");

    let mut conn = pool.get().await.expect("connection");
    for key in &keys {
        let ttl: i64 = conn.ttl(key).await.expect("ttl");
        assert!((110..=120).contains(&ttl), "{key} ttl {ttl}");
    }
}

#[tokio::test]
async fn mismatched_write_is_rejected_before_touching_redis() {
    let (cache, _) = bulk_cache().await;
    let result = cache
        .bulk_write(&[ticker_key("bad", "X")], &[], Duration::from_secs(60))
        .await;
    assert!(result.is_err());
}

/// Origin that records which symbols it was asked for.
#[derive(Default)]
struct RecordingOrigin {
    calls: AtomicU32,
    requested: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl TickerOrigin for RecordingOrigin {
    async fn fetch_snapshots(
        &self,
        symbols: &[String],
    ) -> freshet_core::Result<Vec<TickerSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(symbols.to_vec());
        Ok(symbols
            .iter()
            .map(|s| snapshot(s, 100.0 + s.len() as f64))
            .collect())
    }
}

fn ticker_cache(bulk: BulkCache, origin: Arc<RecordingOrigin>, namespace: &str) -> TickerCache {
    TickerCache::new(
        bulk,
        origin,
        RetryingFetcher::new(RetryPolicy::default()),
        namespace,
        Duration::from_secs(300),
    )
}

#[tokio::test]
async fn zero_hits_fetch_whole_set_from_origin_and_write_back() {
    let (bulk, _) = bulk_cache().await;
    let origin = Arc::new(RecordingOrigin::default());
    let tickers = ticker_cache(bulk.clone(), Arc::clone(&origin), "cold");

    let first = tickers
        .get_snapshots(&["aapl", "nflx", "tsla"])
        .await
        .expect("snapshots");
    assert_eq!(first.len(), 3);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
    assert_eq!(origin.requested.lock()[0], vec!["AAPL", "NFLX", "TSLA"]);

    // Everything was written back, so the second read is served from Redis.
    let second = tickers
        .get_snapshots(&["AAPL", "NFLX", "TSLA"])
        .await
        .expect("snapshots");
    assert_eq!(second, first);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn partial_hits_are_returned_without_backfill() {
    let (bulk, _) = bulk_cache().await;
    let ns = "partial";
    let cached = snapshot("AAPL", 231.5);
    bulk.bulk_write(
        &[ticker_key(ns, "AAPL")],
        &[cached.encode().expect("encode")],
        Duration::from_secs(300),
    )
    .await
    .expect("seed");

    let origin = Arc::new(RecordingOrigin::default());
    let tickers = ticker_cache(bulk, Arc::clone(&origin), ns);

    let result = tickers
        .get_snapshots(&["AAPL", "NFLX", "TSLA"])
        .await
        .expect("snapshots");
    assert_eq!(result, vec![cached]);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 0);
}
