//! Distributed bulk cache backed by Redis Lua scripts.
//!
//! Both operations are a single script invocation, so N keys cost one round
//! trip and the server applies each call without interleaving other commands.
//!
//! Keys passed to one call should hash to the same slot when running against
//! Redis Cluster; use a hash tag in the namespace (e.g. `{tickers}`) there.

pub mod tickers;

pub use tickers::{TickerCache, TickerOrigin, TickerSnapshot};

use std::time::Duration;

use deadpool_redis::Pool;
use redis::{Script, Value};

use crate::error::{Result, ServerError};

/// Lua script returning `[value, ttl, value, ttl, ...]` for every key that
/// exists with a positive remaining TTL. Missing or expired keys are omitted.
/// Read-only, so it is safe against a replica.
const BULK_FETCH_SCRIPT: &str = r"
local out = {}
for _, key in ipairs(KEYS) do
    local ttl = redis.call('TTL', key)
    if ttl > 0 then
        local value = redis.call('GET', key)
        if value then
            out[#out + 1] = value
            out[#out + 1] = ttl
        end
    end
end
return out
";

/// Lua script setting `KEYS[i] = ARGV[i]` with the shared TTL in the last ARGV.
/// Returns the number of keys written.
const BULK_WRITE_SCRIPT: &str = r"
local ttl = tonumber(ARGV[#ARGV])
for i, key in ipairs(KEYS) do
    redis.call('SET', key, ARGV[i], 'EX', ttl)
end
return #KEYS
";

const FETCH_SCRIPT_NAME: &str = "bulk_fetch_tickers";
const WRITE_SCRIPT_NAME: &str = "bulk_write_tickers";

/// One hit returned by [`BulkCache::bulk_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkHit {
    pub value: Vec<u8>,
    /// Remaining TTL at the time of the fetch.
    pub ttl: Duration,
}

/// Multi-key get/set against Redis, one script call per operation.
#[derive(Clone)]
pub struct BulkCache {
    primary: Pool,
    replica: Option<Pool>,
    fetch_script: Script,
    write_script: Script,
}

impl BulkCache {
    pub fn new(primary: Pool) -> Self {
        Self {
            primary,
            replica: None,
            fetch_script: Script::new(BULK_FETCH_SCRIPT),
            write_script: Script::new(BULK_WRITE_SCRIPT),
        }
    }

    /// Route bulk fetches to a read replica. Writes keep using the primary.
    pub fn with_replica(mut self, replica: Pool) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Fetch every key that is present and unexpired.
    ///
    /// Hits come back in request order, without their keys; callers that need
    /// the key must carry it inside the value.
    pub async fn bulk_fetch(&self, keys: &[String]) -> Result<Vec<BulkHit>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.replica.as_ref().unwrap_or(&self.primary);
        let mut conn = pool.get().await?;

        let mut invocation = self.fetch_script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        let raw: Vec<Value> = invocation.invoke_async(&mut conn).await?;

        let hits = pair_hits(raw)?;
        freshet_core::metrics::record_bulk_fetch(keys.len(), hits.len());
        tracing::debug!(requested = keys.len(), hits = hits.len(), "Bulk fetch");
        Ok(hits)
    }

    /// Set every key to its value with one shared TTL. Returns the count written.
    pub async fn bulk_write(
        &self,
        keys: &[String],
        values: &[Vec<u8>],
        ttl: Duration,
    ) -> Result<usize> {
        if keys.len() != values.len() {
            return Err(freshet_core::Error::permanent(format!(
                "bulk write needs one value per key ({} keys, {} values)",
                keys.len(),
                values.len()
            ))
            .into());
        }
        if keys.is_empty() {
            return Ok(0);
        }
        // SET EX rejects 0.
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.primary.get().await?;
        let mut invocation = self.write_script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for value in values {
            invocation.arg(value.as_slice());
        }
        invocation.arg(ttl_secs);

        let written: i64 = invocation.invoke_async(&mut conn).await?;
        let written = usize::try_from(written).map_err(|_| {
            ServerError::unexpected_reply(WRITE_SCRIPT_NAME, format!("count {written}"))
        })?;

        freshet_core::metrics::record_bulk_write(written);
        tracing::debug!(records = written, ttl_secs, "Bulk write");
        Ok(written)
    }
}

/// Pair up the flat `[value, ttl, ...]` reply of the fetch script.
fn pair_hits(raw: Vec<Value>) -> Result<Vec<BulkHit>> {
    if raw.len() % 2 != 0 {
        return Err(ServerError::unexpected_reply(
            FETCH_SCRIPT_NAME,
            format!("odd number of elements ({})", raw.len()),
        ));
    }

    let mut hits = Vec::with_capacity(raw.len() / 2);
    let mut items = raw.into_iter();
    while let (Some(value), Some(ttl)) = (items.next(), items.next()) {
        let value: Vec<u8> = redis::from_redis_value(&value)
            .map_err(|e| ServerError::unexpected_reply(FETCH_SCRIPT_NAME, e.to_string()))?;
        let ttl: i64 = redis::from_redis_value(&ttl)
            .map_err(|e| ServerError::unexpected_reply(FETCH_SCRIPT_NAME, e.to_string()))?;
        let ttl = u64::try_from(ttl)
            .map_err(|_| ServerError::unexpected_reply(FETCH_SCRIPT_NAME, format!("ttl {ttl}")))?;
        hits.push(BulkHit {
            value,
            ttl: Duration::from_secs(ttl),
        });
    }
    Ok(hits)
}

/// Store key for a ticker symbol: `{namespace}:{SYMBOL}`.
pub fn ticker_key(namespace: &str, symbol: &str) -> String {
    format!("{namespace}:{}", symbol.trim().to_ascii_uppercase())
}
