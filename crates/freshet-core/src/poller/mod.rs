//! Dedicated-thread polling of large, rarely-changing blobs.
//!
//! The poller owns an OS thread rather than a task on the request runtime
//! because [`BlobSource`] calls block for as long as a full download takes.
//!
//! ## Loop
//!
//! 1. Check the blob exists and read its metadata.
//! 2. Skip (error log) if `size` is above the configured ceiling.
//! 3. Skip (info log) if `last_modified` is not newer than the last applied update.
//! 4. Download, hand the bytes to the apply callback, then record the new
//!    `last_modified` and bump `update_count`.
//! 5. Sleep for the interval or until shutdown is requested.
//!
//! Shutdown is only observed between iterations, so an in-progress download
//! and apply always completes. [`BackgroundPoller::shutdown`] waits for that up
//! to the configured grace period.

mod source;

pub use source::{BlobMetadata, BlobSource, FileBlobSource};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Name used for the thread, logs and metrics.
    pub name: String,
    pub interval: Duration,
    /// Blobs larger than this are never downloaded.
    pub max_size_bytes: u64,
    /// How long `shutdown` waits for an in-progress iteration.
    pub shutdown_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            name: "blob".to_string(),
            interval: Duration::from_secs(60),
            max_size_bytes: 256 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Result of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    Unchanged,
    Oversized,
    Missing,
    Failed,
}

#[derive(Default)]
struct PollerState {
    update_count: AtomicU64,
    last_modified: Mutex<Option<SystemTime>>,
    last_success: Mutex<Option<Instant>>,
}

/// Handle to a running poller thread.
pub struct BackgroundPoller {
    name: String,
    state: Arc<PollerState>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl BackgroundPoller {
    /// Start polling `source`, passing every new blob to `apply` on the
    /// poller thread.
    pub fn spawn<S, A>(config: PollerConfig, source: S, apply: A) -> Result<Self>
    where
        S: BlobSource,
        A: FnMut(Vec<u8>) -> Result<()> + Send + 'static,
    {
        if config.interval.is_zero() {
            return Err(Error::invalid_config("poller interval must be > 0"));
        }

        let state = Arc::new(PollerState::default());
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let name = config.name.clone();
        let shutdown_grace = config.shutdown_grace;
        let worker = Worker {
            config,
            source,
            apply,
            state: Arc::clone(&state),
        };

        let handle = std::thread::Builder::new()
            .name(format!("poller-{name}"))
            .spawn(move || {
                worker.run(shutdown_rx);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                Error::invalid_config(format!("failed to spawn poller thread: {e}"))
            })?;

        Ok(Self {
            name,
            state,
            shutdown_tx: Some(shutdown_tx),
            done_rx,
            handle: Some(handle),
            shutdown_grace,
        })
    }

    /// Start polling and publish each parsed blob through an `ArcSwapOption`
    /// that request handlers can read without locking.
    pub fn spawn_parsed<S, T, P>(
        config: PollerConfig,
        source: S,
        parse: P,
    ) -> Result<(Self, Arc<ArcSwapOption<T>>)>
    where
        S: BlobSource,
        T: Send + Sync + 'static,
        P: Fn(&[u8]) -> Result<T> + Send + 'static,
    {
        let published = Arc::new(ArcSwapOption::empty());
        let target = Arc::clone(&published);
        let poller = Self::spawn(config, source, move |bytes| {
            let parsed = parse(&bytes)?;
            target.store(Some(Arc::new(parsed)));
            Ok(())
        })?;
        Ok((poller, published))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of blobs successfully applied so far.
    pub fn update_count(&self) -> u64 {
        self.state.update_count.load(Ordering::Acquire)
    }

    /// `last_modified` of the most recently applied blob.
    pub fn last_modified(&self) -> Option<SystemTime> {
        *self.state.last_modified.lock()
    }

    /// Time since the last successful update.
    pub fn staleness(&self) -> Option<Duration> {
        self.state.last_success.lock().map(|at| at.elapsed())
    }

    /// Signal the thread to stop and wait up to the grace period for it.
    ///
    /// Returns `false` if the thread was still busy when the grace period
    /// ran out; it is then left to finish on its own.
    pub fn shutdown(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        let Some(tx) = self.shutdown_tx.take() else {
            return true;
        };
        let _ = tx.send(());
        drop(tx);

        match self.done_rx.recv_timeout(self.shutdown_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        error!(poller = %self.name, "Poller thread panicked");
                    }
                }
                info!(poller = %self.name, "Poller stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    poller = %self.name,
                    grace_secs = self.shutdown_grace.as_secs_f64(),
                    "Poller did not stop within grace period, detaching"
                );
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for BackgroundPoller {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread; it exits after the current iteration.
        self.shutdown_tx.take();
    }
}

struct Worker<S, A> {
    config: PollerConfig,
    source: S,
    apply: A,
    state: Arc<PollerState>,
}

impl<S, A> Worker<S, A>
where
    S: BlobSource,
    A: FnMut(Vec<u8>) -> Result<()>,
{
    fn run(mut self, shutdown_rx: mpsc::Receiver<()>) {
        info!(
            poller = %self.config.name,
            source = %self.source.describe(),
            interval_secs = self.config.interval.as_secs_f64(),
            "Poller started"
        );

        loop {
            self.poll_once();

            match shutdown_rx.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn poll_once(&mut self) -> PollOutcome {
        let result = self.check_and_apply();
        let name = self.config.name.as_str();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    poller = %name,
                    source = %self.source.describe(),
                    error = %e,
                    "Blob poll failed"
                );
                metrics::record_poller_rejected(name, "error");
                PollOutcome::Failed
            }
        };

        if let Some(at) = *self.state.last_success.lock() {
            metrics::set_poller_staleness(name, at.elapsed());
        }
        outcome
    }

    fn check_and_apply(&mut self) -> Result<PollOutcome> {
        let name = self.config.name.as_str();

        if !self.source.exists()? {
            warn!(poller = %name, source = %self.source.describe(), "Blob does not exist");
            metrics::record_poller_rejected(name, "missing");
            return Ok(PollOutcome::Missing);
        }

        let meta = self.source.metadata()?;
        metrics::set_poller_blob_bytes(name, meta.size);

        if meta.size > self.config.max_size_bytes {
            error!(
                poller = %name,
                size = meta.size,
                max_size_bytes = self.config.max_size_bytes,
                "Blob exceeds size ceiling, skipping update"
            );
            metrics::record_poller_rejected(name, "oversized");
            return Ok(PollOutcome::Oversized);
        }

        let previous = *self.state.last_modified.lock();
        if previous.is_some_and(|prev| meta.last_modified <= prev) {
            info!(poller = %name, "Blob unchanged, skipping update");
            return Ok(PollOutcome::Unchanged);
        }

        let bytes = self.source.download()?;
        if bytes.len() as u64 > self.config.max_size_bytes {
            error!(
                poller = %name,
                size = bytes.len(),
                max_size_bytes = self.config.max_size_bytes,
                "Downloaded blob exceeds size ceiling, discarding"
            );
            metrics::record_poller_rejected(name, "oversized");
            return Ok(PollOutcome::Oversized);
        }

        (self.apply)(bytes)?;

        *self.state.last_modified.lock() = Some(meta.last_modified);
        *self.state.last_success.lock() = Some(Instant::now());
        let count = self.state.update_count.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::record_poller_update(name);
        info!(poller = %name, update_count = count, size = meta.size, "Blob updated");
        Ok(PollOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// In-memory source whose metadata and contents tests can change.
    #[derive(Clone, Default)]
    struct MemorySource {
        blob: Arc<Mutex<Option<(Vec<u8>, SystemTime)>>>,
        downloads: Arc<AtomicUsize>,
    }

    impl MemorySource {
        fn put(&self, bytes: &[u8], modified: SystemTime) {
            *self.blob.lock() = Some((bytes.to_vec(), modified));
        }
    }

    impl BlobSource for MemorySource {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        fn exists(&self) -> Result<bool> {
            Ok(self.blob.lock().is_some())
        }

        fn metadata(&self) -> Result<BlobMetadata> {
            let guard = self.blob.lock();
            let (bytes, modified) = guard.as_ref().ok_or_else(|| Error::blob("missing"))?;
            Ok(BlobMetadata {
                size: bytes.len() as u64,
                last_modified: *modified,
            })
        }

        fn download(&self) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let guard = self.blob.lock();
            guard
                .as_ref()
                .map(|(bytes, _)| bytes.clone())
                .ok_or_else(|| Error::blob("missing"))
        }
    }

    fn worker(
        source: MemorySource,
        max_size_bytes: u64,
    ) -> (Worker<MemorySource, impl FnMut(Vec<u8>) -> Result<()>>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&applied);
        let worker = Worker {
            config: PollerConfig {
                name: "test".to_string(),
                max_size_bytes,
                ..PollerConfig::default()
            },
            source,
            apply: move |bytes: Vec<u8>| {
                sink.lock().push(bytes);
                Ok(())
            },
            state: Arc::new(PollerState::default()),
        };
        (worker, applied)
    }

    #[test]
    fn applies_new_blob_then_skips_unchanged() {
        let source = MemorySource::default();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        source.put(b"v1", t0);
        let (mut worker, applied) = worker(source.clone(), 1024);

        assert_eq!(worker.poll_once(), PollOutcome::Updated);
        assert_eq!(worker.poll_once(), PollOutcome::Unchanged);
        assert_eq!(worker.state.update_count.load(Ordering::SeqCst), 1);
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);

        source.put(b"v2", t0 + Duration::from_secs(5));
        assert_eq!(worker.poll_once(), PollOutcome::Updated);
        assert_eq!(*applied.lock(), vec![b"v1".to_vec(), b"v2".to_vec()]);
        assert_eq!(worker.state.update_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn oversized_blob_is_not_downloaded() {
        let source = MemorySource::default();
        source.put(&[0u8; 64], SystemTime::UNIX_EPOCH + Duration::from_secs(1));
        let (mut worker, applied) = worker(source.clone(), 16);

        assert_eq!(worker.poll_once(), PollOutcome::Oversized);
        assert_eq!(source.downloads.load(Ordering::SeqCst), 0);
        assert!(applied.lock().is_empty());
        assert_eq!(*worker.state.last_modified.lock(), None);
    }

    #[test]
    fn missing_blob_is_skipped() {
        let (mut worker, _) = worker(MemorySource::default(), 16);
        assert_eq!(worker.poll_once(), PollOutcome::Missing);
        assert_eq!(worker.state.update_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_apply_does_not_advance_last_modified() {
        let source = MemorySource::default();
        source.put(b"not json", SystemTime::UNIX_EPOCH + Duration::from_secs(1));
        let mut worker = Worker {
            config: PollerConfig::default(),
            source,
            apply: |_bytes: Vec<u8>| -> Result<()> { Err(Error::blob("parse failed")) },
            state: Arc::new(PollerState::default()),
        };

        assert_eq!(worker.poll_once(), PollOutcome::Failed);
        assert_eq!(*worker.state.last_modified.lock(), None);
        // The next iteration tries again.
        assert_eq!(worker.poll_once(), PollOutcome::Failed);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = PollerConfig {
            interval: Duration::ZERO,
            ..PollerConfig::default()
        };
        let result = BackgroundPoller::spawn(config, MemorySource::default(), |_| Ok(()));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
