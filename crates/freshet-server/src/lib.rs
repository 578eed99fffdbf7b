pub mod blob_http;
pub mod bulk;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;

pub use blob_http::HttpBlobSource;
pub use bulk::{BulkCache, BulkHit, TickerCache, TickerOrigin, TickerSnapshot, ticker_key};
pub use config::{AppConfig, RedisConfig};
pub use error::{Result, ServerError};

use std::time::Duration;

use deadpool_redis::{Pool, Runtime};
use freshet_core::{BlobSource, FileBlobSource};
use tokio::runtime::Handle;

/// Create a Redis connection pool and check that a connection can be made.
pub async fn create_redis_pool(url: &str, config: &RedisConfig) -> Result<Pool> {
    tracing::info!(url = %url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(url);
    let timeout = Duration::from_millis(config.timeout_ms);
    // `from_url` leaves the pool section unset
    let mut pool_config = redis_config.get_pool_config();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;

    // Test connection
    match pool.get().await {
        Ok(_) => {
            tracing::info!(url = %url, "Connected to Redis");
            Ok(pool)
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Failed to connect to Redis");
            Err(e.into())
        }
    }
}

/// Build the bulk cache from config: primary pool, plus a replica pool for
/// reads when `redis.replica_url` is set.
pub async fn connect_bulk_cache(config: &RedisConfig) -> Result<BulkCache> {
    let primary = create_redis_pool(&config.url, config).await?;
    let mut cache = BulkCache::new(primary);
    if let Some(replica_url) = config.replica_url.as_deref().filter(|u| !u.is_empty()) {
        let replica = create_redis_pool(replica_url, config).await?;
        cache = cache.with_replica(replica);
        tracing::info!(url = %replica_url, "Bulk fetches routed to read replica");
    }
    Ok(cache)
}

/// Blob source for a configured location: `http(s)://` URLs are fetched with
/// [`HttpBlobSource`] on `handle`, a location without a scheme is a local path.
pub fn blob_source_for(location: &str, handle: Handle) -> Result<Box<dyn BlobSource>> {
    let location = location.trim();
    if location.is_empty() {
        return Err(ServerError::config("poller.source is empty"));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Box::new(HttpBlobSource::new(location, handle)?));
    }
    if let Some((scheme, _)) = location.split_once("://") {
        return Err(ServerError::config(format!(
            "unsupported blob source scheme {scheme:?} in {location}"
        )));
    }
    Ok(Box::new(FileBlobSource::new(location)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn picks_source_by_scheme() {
        let handle = Handle::current();
        let http = blob_source_for("https://blobs.example.com/model.json", handle.clone()).unwrap();
        assert_eq!(http.describe(), "https://blobs.example.com/model.json");

        let file = blob_source_for("/var/lib/freshet/model.json", handle).unwrap();
        assert_eq!(file.describe(), "/var/lib/freshet/model.json");
    }

    #[tokio::test]
    async fn rejects_empty_and_unknown_locations() {
        let handle = Handle::current();
        let empty = blob_source_for("  ", handle.clone()).err().unwrap();
        assert!(matches!(empty, ServerError::Config(_)));

        let s3 = blob_source_for("s3://models/ranker.json", handle).err().unwrap();
        assert!(s3.to_string().contains("\"s3\""));
    }
}
