//! Stale-while-revalidate cache with per-key request coalescing.
//!
//! ## Read Path
//!
//! ```text
//! get(key, fetch)
//!   ├─ no entry        → create, lock, re-check, fetch in the foreground
//!   ├─ fresh           → return cached value (lock untouched)
//!   └─ stale
//!        ├─ lock free  → launch one background revalidation holding the lock
//!        ├─ has value  → return stale value immediately
//!        └─ no value   → wait for the lock, return value or ValueUnavailable
//! ```
//!
//! ## Coalescing
//!
//! Every entry owns one async mutex. Whoever holds it is the only party
//! allowed to run `fetch` for that key, so any number of concurrent callers
//! cause at most one upstream call in flight per key. Readers of a fresh or
//! stale value never wait on the mutex.
//!
//! Background revalidations acquire the mutex *before* they are spawned and
//! move the owned guard into the task. A stale read therefore either launches
//! the single revalidation or observes that one is already running; there is
//! no window in which two callers both see an idle mutex.
//!
//! ## Failure Handling
//!
//! A background failure with a stale value present is logged and the stale
//! value keeps being served until a later revalidation succeeds. A failure
//! with no value ever stored surfaces as [`Error::ValueUnavailable`] from the
//! next caller that waits on the key.

mod jobs;

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::expiration::ExpirationPolicy;
use crate::metrics;

use jobs::JobRegistry;

/// Value, expiry and last update time for one key.
///
/// `expires_at == None` means the entry has never been populated and is
/// always stale.
struct Slot<V> {
    value: Option<V>,
    expires_at: Option<Instant>,
    updated_at: Option<Instant>,
}

impl<V: Clone> Slot<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        self.value.is_some() && self.expires_at.is_some_and(|at| now < at)
    }
}

struct CacheEntry<V> {
    slot: RwLock<Slot<V>>,
    fetch_lock: Arc<Mutex<()>>,
}

impl<V: Clone> CacheEntry<V> {
    fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                value: None,
                expires_at: None,
                updated_at: None,
            }),
            fetch_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current value (if any) and whether it is fresh at `now`.
    fn read(&self, now: Instant) -> (Option<V>, bool, Option<Instant>) {
        let slot = self.slot.read();
        (slot.value.clone(), slot.is_fresh(now), slot.updated_at)
    }

    fn current_value(&self) -> Option<V> {
        self.slot.read().value.clone()
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.slot.read().is_fresh(now)
    }

    fn has_value(&self) -> bool {
        self.slot.read().value.is_some()
    }

    /// Must only be called while `fetch_lock` is held.
    fn store(&self, value: V, now: Instant, expires_at: Instant) {
        let mut slot = self.slot.write();
        slot.value = Some(value);
        slot.expires_at = Some(expires_at);
        slot.updated_at = Some(now);
    }
}

/// Counters describing cache activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub updates: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    failures: AtomicU64,
}

struct Inner<K, V> {
    name: String,
    entries: DashMap<K, Arc<CacheEntry<V>>>,
    expiration: ExpirationPolicy,
    jobs: JobRegistry,
    counters: Counters,
}

/// Generic stale-while-revalidate cache.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct RevalidatingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for RevalidatingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> RevalidatingCache<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache. `name` labels logs and metrics.
    pub fn new(name: impl Into<String>, expiration: ExpirationPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                entries: DashMap::new(),
                expiration,
                jobs: JobRegistry::default(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Return the value for `key`, fetching or revalidating as needed.
    ///
    /// `fetch` is only invoked by the party holding the key's lock; if another
    /// fetch is already running for `key`, it is dropped unused.
    pub async fn get<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (entry, created) = self.inner.entry(&key);

        if created {
            return self.inner.first_fetch(&key, &entry, fetch).await;
        }

        let now = Instant::now();
        let (value, fresh, updated_at) = entry.read(now);

        if fresh {
            if let Some(value) = value {
                self.inner.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(&self.inner.name, "fresh");
                self.inner.report_staleness(now, updated_at);
                return Ok(value);
            }
        }

        match Arc::clone(&entry.fetch_lock).try_lock_owned() {
            Ok(guard) => {
                tracing::debug!(
                    cache = %self.inner.name,
                    key = %key,
                    "scheduling background revalidation"
                );
                Inner::spawn_revalidation(
                    &self.inner,
                    key.clone(),
                    Arc::clone(&entry),
                    guard,
                    fetch,
                );
            }
            Err(_) => {
                tracing::debug!(
                    cache = %self.inner.name,
                    key = %key,
                    "revalidation already in flight"
                );
            }
        }

        if let Some(value) = value {
            self.inner.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_hit(&self.inner.name, "stale");
            self.inner.report_staleness(now, updated_at);
            return Ok(value);
        }

        // No value has ever been stored: wait for the in-flight fetch.
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss(&self.inner.name);
        tokio::task::yield_now().await;
        let _guard = entry.fetch_lock.lock().await;
        entry.current_value().ok_or_else(|| Error::value_unavailable(&key))
    }

    /// Current value for `key` without fetching, fresh or stale.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .get(key)
            .and_then(|entry| entry.current_value())
    }

    /// Number of keys ever requested.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Background revalidations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Wait for every background revalidation to finish.
    pub async fn settle(&self) {
        self.inner.jobs.settle().await;
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            entries: self.inner.entries.len(),
            in_flight: self.inner.jobs.len(),
            fresh_hits: counters.fresh_hits.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            updates: counters.updates.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Look up or create the entry for `key`. The flag is true for the creator.
    fn entry(&self, key: &K) -> (Arc<CacheEntry<V>>, bool) {
        if let Some(existing) = self.entries.get(key) {
            return (Arc::clone(existing.value()), false);
        }

        let (entry, created) = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            MapEntry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::new());
                vacant.insert(Arc::clone(&entry));
                (entry, true)
            }
        };

        if created {
            metrics::set_cache_entries(&self.name, self.entries.len());
        }
        (entry, created)
    }

    async fn first_fetch<F, Fut>(&self, key: &K, entry: &CacheEntry<V>, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let _guard = entry.fetch_lock.lock().await;

        // A background revalidation may have populated the entry while we waited.
        let now = Instant::now();
        if entry.is_fresh(now) {
            if let Some(value) = entry.current_value() {
                return Ok(value);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss(&self.name);

        match fetch().await {
            Ok(value) => {
                self.store(key, entry, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                tracing::warn!(cache = %self.name, key = %key, error = %e, "initial fetch failed");
                Err(e)
            }
        }
    }

    fn spawn_revalidation<F, Fut>(
        this: &Arc<Self>,
        key: K,
        entry: Arc<CacheEntry<V>>,
        guard: OwnedMutexGuard<()>,
        fetch: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(this);
        this.jobs.spawn(async move {
            inner.revalidate(key, entry, guard, fetch).await;
        });
    }

    async fn revalidate<F, Fut>(
        &self,
        key: K,
        entry: Arc<CacheEntry<V>>,
        _guard: OwnedMutexGuard<()>,
        fetch: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // A sibling revalidation may have finished between the stale read and
        // our lock acquisition.
        if entry.is_fresh(Instant::now()) {
            return;
        }

        match fetch().await {
            Ok(value) => self.store(&key, &entry, value),
            Err(e) => {
                self.record_failure(&e);
                if entry.has_value() {
                    tracing::error!(
                        cache = %self.name,
                        key = %key,
                        error = %e,
                        "Background revalidation failed, serving stale value"
                    );
                } else {
                    tracing::error!(
                        cache = %self.name,
                        key = %key,
                        error = %e,
                        "Background revalidation failed with no cached value"
                    );
                }
            }
        }
    }

    fn store(&self, key: &K, entry: &CacheEntry<V>, value: V) {
        let now = Instant::now();
        let expires_at = self.expiration.expires_at(now);
        entry.store(value, now, expires_at);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_update(&self.name);
        metrics::set_cache_staleness(&self.name, std::time::Duration::ZERO);
        tracing::debug!(
            cache = %self.name,
            key = %key,
            ttl_ms = (expires_at - now).as_millis() as u64,
            "cache entry updated"
        );
    }

    fn record_failure(&self, error: &Error) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_fetch_failure(&self.name, error.kind());
    }

    fn report_staleness(&self, now: Instant, updated_at: Option<Instant>) {
        if let Some(updated_at) = updated_at {
            metrics::set_cache_staleness(&self.name, now.saturating_duration_since(updated_at));
        }
    }
}
