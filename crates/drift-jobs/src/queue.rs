//! Submission side of the job queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use drift_meta::{MetaStore, StoredJob};
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::JobError;

struct QueueInner {
    meta: Arc<MetaStore>,
    /// `(task, dedup_key)` of every pending or running job.
    in_flight: Mutex<HashSet<(String, String)>>,
    tx: mpsc::UnboundedSender<StoredJob>,
    idle: Notify,
}

/// Cloneable handle for submitting jobs.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub(crate) fn new(meta: Arc<MetaStore>, tx: mpsc::UnboundedSender<StoredJob>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                meta,
                in_flight: Mutex::new(HashSet::new()),
                tx,
                idle: Notify::new(),
            }),
        }
    }

    /// Submit a job unless one with the same task and dedup key is already
    /// pending or running.
    ///
    /// Returns `true` if a new job was queued.
    pub fn create_job_if_not_exists<A: Serialize + ?Sized>(
        &self,
        task: &str,
        args: &A,
        dedup_key: &str,
    ) -> Result<bool, JobError> {
        let job = StoredJob {
            task: task.to_string(),
            dedup_key: dedup_key.to_string(),
            args: postcard::to_allocvec(args)?,
            attempts: 0,
        };

        // Reserve the slot under the lock, persist outside it.
        let id = (job.task.clone(), job.dedup_key.clone());
        if !self.inner.in_flight.lock().expect("lock poisoned").insert(id.clone()) {
            debug!(task, key = dedup_key, "job already in flight");
            return Ok(false);
        }
        if let Err(e) = self.inner.meta.put_job(&job) {
            self.release(&id);
            return Err(e.into());
        }

        if self.inner.tx.send(job).is_err() {
            warn!(task, key = dedup_key, "job runner stopped, job kept for restart");
        }
        debug!(task, key = dedup_key, "job queued");
        Ok(true)
    }

    /// Whether a job with this task and dedup key is pending or running.
    pub fn is_in_flight(&self, task: &str, dedup_key: &str) -> bool {
        let in_flight = self.inner.in_flight.lock().expect("lock poisoned");
        in_flight.contains(&(task.to_string(), dedup_key.to_string()))
    }

    /// Number of pending or running jobs.
    pub fn pending(&self) -> usize {
        self.inner.in_flight.lock().expect("lock poisoned").len()
    }

    /// Wait until no job is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Mark a reloaded job as in flight. Returns false if it already was.
    pub(crate) fn claim(&self, job: &StoredJob) -> bool {
        let mut in_flight = self.inner.in_flight.lock().expect("lock poisoned");
        in_flight.insert((job.task.clone(), job.dedup_key.clone()))
    }

    /// Record the latest attempt count of a running job.
    pub(crate) fn persist(&self, job: &StoredJob) {
        if let Err(e) = self.inner.meta.put_job(job) {
            warn!(task = %job.task, key = %job.dedup_key, error = %e, "failed to persist job");
        }
    }

    /// Drop a job that reached a terminal outcome.
    pub(crate) fn finish(&self, job: &StoredJob) {
        if let Err(e) = self.inner.meta.remove_job(&job.task, &job.dedup_key) {
            warn!(task = %job.task, key = %job.dedup_key, error = %e, "failed to remove job");
        }
        self.release(&(job.task.clone(), job.dedup_key.clone()));
    }

    fn release(&self, id: &(String, String)) {
        let now_idle = {
            let mut in_flight = self.inner.in_flight.lock().expect("lock poisoned");
            in_flight.remove(id);
            in_flight.is_empty()
        };
        if now_idle {
            self.inner.idle.notify_waiters();
        }
    }

    pub(crate) fn meta(&self) -> &Arc<MetaStore> {
        &self.inner.meta
    }
}
