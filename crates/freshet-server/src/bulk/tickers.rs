//! Ticker snapshot cache on top of [`BulkCache`].
//!
//! Read contract:
//!
//! - a non-empty hit set, even a partial one, is returned as is; the missing
//!   symbols are *not* fetched from the origin in the same call
//! - zero hits fetches the whole requested set from the origin and writes all
//!   of it back with one shared TTL
//!
//! A Redis failure counts as zero hits, and a failed write-back is logged and
//! ignored; the origin result is still returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use freshet_core::RetryingFetcher;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{BulkCache, ticker_key};
use crate::error::Result;

/// Point-in-time market data for one symbol, stored MessagePack-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    /// Unix seconds.
    pub as_of: i64,
}

impl TickerSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Source of truth for ticker snapshots (a market-data API).
#[async_trait]
pub trait TickerOrigin: Send + Sync {
    async fn fetch_snapshots(
        &self,
        symbols: &[String],
    ) -> freshet_core::Result<Vec<TickerSnapshot>>;
}

pub struct TickerCache {
    bulk: BulkCache,
    origin: Arc<dyn TickerOrigin>,
    retry: RetryingFetcher,
    namespace: String,
    ttl: Duration,
}

impl TickerCache {
    pub fn new(
        bulk: BulkCache,
        origin: Arc<dyn TickerOrigin>,
        retry: RetryingFetcher,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            bulk,
            origin,
            retry,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn key_for(&self, symbol: &str) -> String {
        ticker_key(&self.namespace, symbol)
    }

    /// Snapshots for `symbols`. See the module docs for the partial-hit contract.
    pub async fn get_snapshots(&self, symbols: &[&str]) -> Result<Vec<TickerSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = symbols.iter().map(|s| self.key_for(s)).collect();

        let cached = self.read_cached(&keys).await;
        if !cached.is_empty() {
            if cached.len() < keys.len() {
                debug!(
                    requested = keys.len(),
                    hits = cached.len(),
                    "Returning partial ticker hit set"
                );
            }
            return Ok(cached);
        }

        let requested: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .collect();
        let origin = Arc::clone(&self.origin);
        let snapshots = self
            .retry
            .call("ticker_origin", || {
                let origin = Arc::clone(&origin);
                let requested = requested.clone();
                async move { origin.fetch_snapshots(&requested).await }
            })
            .await?;

        info!(
            requested = requested.len(),
            fetched = snapshots.len(),
            "Fetched tickers from origin"
        );
        self.write_back(&snapshots).await;
        Ok(snapshots)
    }

    async fn read_cached(&self, keys: &[String]) -> Vec<TickerSnapshot> {
        let hits = match self.bulk.bulk_fetch(keys).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(
                    error = %e,
                    requested = keys.len(),
                    "Bulk ticker fetch failed, treating as miss"
                );
                return Vec::new();
            }
        };

        hits.into_iter()
            .filter_map(|hit| match TickerSnapshot::decode(&hit.value) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable ticker snapshot");
                    None
                }
            })
            .collect()
    }

    async fn write_back(&self, snapshots: &[TickerSnapshot]) {
        let encoded: Result<Vec<(String, Vec<u8>)>> = snapshots
            .iter()
            .map(|s| Ok((self.key_for(&s.symbol), s.encode()?)))
            .collect();
        let (keys, values): (Vec<String>, Vec<Vec<u8>>) = match encoded {
            Ok(pairs) => pairs.into_iter().unzip(),
            Err(e) => {
                warn!(error = %e, "Failed to encode ticker snapshots, skipping write-back");
                return;
            }
        };

        if let Err(e) = self.bulk.bulk_write(&keys, &values, self.ttl).await {
            warn!(error = %e, records = keys.len(), "Bulk ticker write failed");
        }
    }
}
