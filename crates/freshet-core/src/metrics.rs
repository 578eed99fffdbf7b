//! Metrics emitted by the caching primitives.
//!
//! Recording goes through the `metrics` facade; installing an exporter is the
//! host process's job (see `freshet_server::metrics::init_metrics`). Without an
//! installed recorder every call here is a no-op.

use std::time::Duration;

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    // Revalidating cache metrics
    pub const CACHE_ENTRIES: &str = "freshet_cache_entries";
    pub const CACHE_HITS_TOTAL: &str = "freshet_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "freshet_cache_misses_total";
    pub const CACHE_UPDATES_TOTAL: &str = "freshet_cache_updates_total";
    pub const CACHE_FETCH_FAILURES_TOTAL: &str = "freshet_cache_fetch_failures_total";
    pub const CACHE_STALENESS_SECONDS: &str = "freshet_cache_staleness_seconds";

    // Retry metrics
    pub const RETRY_ATTEMPTS_TOTAL: &str = "freshet_retry_attempts_total";

    // Bulk cache metrics
    pub const BULK_HITS_TOTAL: &str = "freshet_bulk_hits_total";
    pub const BULK_MISSES_TOTAL: &str = "freshet_bulk_misses_total";
    pub const BULK_WRITES_TOTAL: &str = "freshet_bulk_writes_total";
    pub const BULK_RECORDS: &str = "freshet_bulk_records";

    // Background poller metrics
    pub const POLLER_BLOB_BYTES: &str = "freshet_poller_blob_bytes";
    pub const POLLER_UPDATES_TOTAL: &str = "freshet_poller_updates_total";
    pub const POLLER_STALENESS_SECONDS: &str = "freshet_poller_staleness_seconds";
    pub const POLLER_REJECTED_TOTAL: &str = "freshet_poller_rejected_total";
}

// =============================================================================
// Revalidating Cache Metrics
// =============================================================================

/// Record a cache hit. `state` is `"fresh"` or `"stale"`.
pub fn record_cache_hit(cache: &str, state: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache.to_string(), "state" => state).increment(1);
}

/// Record a read that found no value at all.
pub fn record_cache_miss(cache: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache.to_string()).increment(1);
}

/// Record a successful fetch-and-store.
pub fn record_cache_update(cache: &str) {
    counter!(names::CACHE_UPDATES_TOTAL, "cache" => cache.to_string()).increment(1);
}

/// Record a failed fetch, foreground or background.
pub fn record_cache_fetch_failure(cache: &str, kind: &'static str) {
    counter!(names::CACHE_FETCH_FAILURES_TOTAL, "cache" => cache.to_string(), "kind" => kind)
        .increment(1);
}

pub fn set_cache_entries(cache: &str, entries: usize) {
    gauge!(names::CACHE_ENTRIES, "cache" => cache.to_string()).set(entries as f64);
}

/// Seconds since the value being served was last successfully fetched.
pub fn set_cache_staleness(cache: &str, age: Duration) {
    gauge!(names::CACHE_STALENESS_SECONDS, "cache" => cache.to_string()).set(age.as_secs_f64());
}

// =============================================================================
// Retry Metrics
// =============================================================================

pub fn record_retry_attempt(operation: &str) {
    counter!(names::RETRY_ATTEMPTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Bulk Cache Metrics
// =============================================================================

/// Record the outcome of one bulk fetch.
pub fn record_bulk_fetch(requested: usize, hits: usize) {
    counter!(names::BULK_HITS_TOTAL).increment(hits as u64);
    counter!(names::BULK_MISSES_TOTAL).increment(requested.saturating_sub(hits) as u64);
}

/// Record one bulk write of `records` keys.
pub fn record_bulk_write(records: usize) {
    counter!(names::BULK_WRITES_TOTAL).increment(1);
    gauge!(names::BULK_RECORDS).set(records as f64);
}

// =============================================================================
// Background Poller Metrics
// =============================================================================

pub fn set_poller_blob_bytes(poller: &str, bytes: u64) {
    gauge!(names::POLLER_BLOB_BYTES, "poller" => poller.to_string()).set(bytes as f64);
}

pub fn record_poller_update(poller: &str) {
    counter!(names::POLLER_UPDATES_TOTAL, "poller" => poller.to_string()).increment(1);
}

pub fn set_poller_staleness(poller: &str, age: Duration) {
    gauge!(names::POLLER_STALENESS_SECONDS, "poller" => poller.to_string())
        .set(age.as_secs_f64());
}

/// Record a skipped update. `reason` is `"oversized"`, `"missing"` or `"error"`.
pub fn record_poller_rejected(poller: &str, reason: &'static str) {
    counter!(names::POLLER_REJECTED_TOTAL, "poller" => poller.to_string(), "reason" => reason)
        .increment(1);
}
