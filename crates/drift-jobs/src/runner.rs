//! Execution side of the job queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use drift_meta::{MetaStore, StoredJob};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::schedule::TimeOfDay;
use crate::{JobError, JobQueue, Task};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
    /// Runs attempted before a failing job is dropped.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Create a connected queue and runner over `meta`.
pub fn channel(meta: Arc<MetaStore>, config: JobConfig) -> (JobQueue, JobRunner) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = JobQueue::new(meta, tx);
    let runner = JobRunner {
        queue: queue.clone(),
        rx,
        tasks: HashMap::new(),
        daily: Vec::new(),
        config,
    };
    (queue, runner)
}

/// Executes queued jobs with registered tasks.
pub struct JobRunner {
    queue: JobQueue,
    rx: mpsc::UnboundedReceiver<StoredJob>,
    tasks: HashMap<String, Arc<dyn Task>>,
    daily: Vec<(String, TimeOfDay)>,
    config: JobConfig,
}

impl JobRunner {
    /// Register a task under its name, replacing any previous one.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        debug!(task = task.name(), "registered task");
        self.tasks.insert(task.name().to_string(), task);
    }

    /// Submit `task` every day at `at` (UTC), deduplicated by task name.
    pub fn schedule_daily(&mut self, task: &str, at: TimeOfDay) {
        self.daily.push((task.to_string(), at));
    }

    /// Reload persisted jobs and start executing. Must be called within a
    /// tokio runtime.
    pub fn start(self) -> Result<JobRunnerHandle, JobError> {
        let JobRunner {
            queue,
            rx,
            tasks,
            daily,
            config,
        } = self;

        let stats = Arc::new(JobStats::default());
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let worker = Worker {
            queue: queue.clone(),
            tasks: Arc::new(tasks),
            config,
            concurrency: Arc::new(Semaphore::new(0)),
            stats: stats.clone(),
        };
        worker.concurrency.add_permits(worker.config.concurrency.max(1));

        let reloaded = queue.meta().list_jobs()?;
        if !reloaded.is_empty() {
            info!(count = reloaded.len(), "resuming persisted jobs");
        }
        for job in reloaded {
            if queue.claim(&job) {
                worker.dispatch(job);
            }
        }

        let mut tasks = Vec::new();
        for (task, at) in daily {
            tasks.push(tokio::spawn(run_daily(
                queue.clone(),
                task,
                at,
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(worker.run(rx, shutdown_rx)));

        Ok(JobRunnerHandle {
            queue,
            stats,
            shutdown_tx,
            tasks,
        })
    }
}

#[derive(Default)]
struct JobStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

struct Worker {
    queue: JobQueue,
    tasks: Arc<HashMap<String, Arc<dyn Task>>>,
    config: JobConfig,
    concurrency: Arc<Semaphore>,
    stats: Arc<JobStats>,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<StoredJob>,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        info!("job runner started");
        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => self.dispatch(job),
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    info!("job runner shutting down");
                    break;
                }
            }
        }
        info!("job runner stopped");
    }

    /// Spawn the attempt loop for one job.
    fn dispatch(&self, mut job: StoredJob) {
        let Some(task) = self.tasks.get(&job.task).cloned() else {
            let err = JobError::UnknownTask(job.task.clone());
            error!(key = %job.dedup_key, error = %err, "dropping job");
            self.queue.finish(&job);
            return;
        };
        let queue = self.queue.clone();
        let concurrency = self.concurrency.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                let Ok(permit) = concurrency.clone().acquire_owned().await else {
                    return;
                };
                job.attempts += 1;
                queue.persist(&job);

                let result = task.run(&job.args).await;
                drop(permit);

                match result {
                    Ok(()) => {
                        stats.completed.fetch_add(1, Ordering::Relaxed);
                        debug!(task = %job.task, key = %job.dedup_key, attempts = job.attempts, "job completed");
                        break;
                    }
                    Err(e) if !e.is_retryable() || job.attempts >= config.max_attempts => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            task = %job.task,
                            key = %job.dedup_key,
                            attempts = job.attempts,
                            error = %e,
                            "job failed"
                        );
                        break;
                    }
                    Err(e) => {
                        let delay = config.retry_backoff * job.attempts;
                        warn!(
                            task = %job.task,
                            key = %job.dedup_key,
                            attempts = job.attempts,
                            ?delay,
                            error = %e,
                            "job failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            queue.finish(&job);
        });
    }
}

async fn run_daily(
    queue: JobQueue,
    task: String,
    at: TimeOfDay,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) {
    info!(task, hour = at.hour, minute = at.minute, "daily schedule started");
    loop {
        let delay = at.delay_from_now();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                match queue.create_job_if_not_exists(&task, &(), &task) {
                    Ok(true) => info!(task, "scheduled daily job"),
                    Ok(false) => debug!(task, "daily job still running, skipped"),
                    Err(e) => error!(task, error = %e, "failed to schedule daily job"),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Handle to a running [`JobRunner`].
pub struct JobRunnerHandle {
    queue: JobQueue,
    stats: Arc<JobStats>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl JobRunnerHandle {
    /// The queue this runner executes.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Jobs that completed successfully since start.
    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Jobs dropped after failing since start.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Stop accepting new jobs. Running jobs finish on their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Abort the runner and schedule tasks.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Check whether the runner is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}
