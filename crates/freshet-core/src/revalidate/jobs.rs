//! In-flight background revalidation registry.
//!
//! Holds the `JoinHandle` of every detached revalidation until the task
//! finishes. Each task removes its own handle on completion (success, failure
//! or panic) through a drop guard, so the registry only ever contains work that
//! is still running.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Jobs {
    running: HashMap<u64, JoinHandle<()>>,
    /// Ids whose handle `settle` has taken and is awaiting.
    settling: HashSet<u64>,
    /// Ids whose task ended before `spawn` got to register the handle.
    finished_early: HashSet<u64>,
}

type SharedJobs = Arc<Mutex<Jobs>>;

#[derive(Default)]
pub(crate) struct JobRegistry {
    next_id: AtomicU64,
    jobs: SharedJobs,
}

impl JobRegistry {
    /// Spawn `job` onto the current runtime and keep its handle until it ends.
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deregister = Deregister {
            id,
            jobs: Arc::clone(&self.jobs),
        };

        // No lock held here: on a closed runtime the task is dropped in place
        // and its guard locks `jobs` on this thread.
        let handle = tokio::spawn(async move {
            let _deregister = deregister;
            job.await;
        });

        let mut jobs = self.jobs.lock();
        if !jobs.finished_early.remove(&id) {
            jobs.running.insert(id, handle);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().running.len()
    }

    /// Wait until every job spawned so far (and any spawned meanwhile) finished.
    pub(crate) async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut jobs = self.jobs.lock();
                let drained: Vec<(u64, JoinHandle<()>)> = jobs.running.drain().collect();
                jobs.settling.extend(drained.iter().map(|(id, _)| *id));
                drained.into_iter().map(|(_, handle)| handle).collect()
            };
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Background revalidation task panicked");
                    } else {
                        tracing::debug!(error = %e, "Background revalidation task cancelled");
                    }
                }
            }
        }
    }
}

struct Deregister {
    id: u64,
    jobs: SharedJobs,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        let mut jobs = self.jobs.lock();
        let known = jobs.running.remove(&self.id).is_some() || jobs.settling.remove(&self.id);
        if !known {
            jobs.finished_early.insert(self.id);
        }
    }
}
