use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::queue::JobQueue;
use crate::types::{Job, JobKind};

/// What a handler wants done with its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    /// Work done; COMPLETED.
    Complete,
    /// Not a failure — run again at `run_after` without consuming the retry
    /// budget (soft pause, send-window wait, recurring poll).
    Reschedule { run_after: DateTime<Utc> },
    /// Transient failure; the queue applies exponential backoff.
    Retry { error: String },
    /// Transient failure with an explicit pause (quota exhaustion).
    RetryAfter { error: String, delay: Duration },
    /// Permanent failure; FAILED.
    Fail { error: String },
    /// Poison; DEAD, never leased again.
    Dead { error: String },
}

/// A handler for one job kind. Implementations live with the subsystem that
/// owns the work (campaign engine, reply poller, retention).
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Execute the job. Errors are expressed in the disposition — a handler
    /// never panics the worker loop.
    async fn run(&self, job: &Job) -> JobDisposition;
}

/// Worker pool tuning, mirrored from `workers` config.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub count: usize,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    /// Soft per-job deadline; on expiry the job is retried and the adapter
    /// future is dropped.
    pub job_timeout: Duration,
    /// Leases older than `lease_duration + reap_grace` are presumed crashed.
    pub reap_grace: Duration,
    pub batch_size: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            count: 5,
            poll_interval: Duration::from_secs(5),
            lease_duration: Duration::from_secs(60),
            job_timeout: Duration::from_secs(300),
            reap_grace: Duration::from_secs(30),
            batch_size: 5,
        }
    }
}

/// Pool of general workers leasing jobs and dispatching to registered
/// handlers, plus a background lease reaper.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    opts: WorkerOptions,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, opts: WorkerOptions) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            opts,
        }
    }

    /// Register a handler. One handler per kind; a duplicate replaces.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Kinds this pool can execute.
    fn kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }

    /// Run the pool until `shutdown` broadcasts `true`. Spawns `count`
    /// worker loops and one reaper loop, and joins them all.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let pool = Arc::new(self);
        info!(
            workers = pool.opts.count,
            kinds = ?pool.kinds(),
            "worker pool starting"
        );

        let mut tasks = Vec::new();
        for i in 0..pool.opts.count {
            let p = Arc::clone(&pool);
            let s = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                p.worker_loop(&format!("worker-{i}"), s).await;
            }));
        }
        {
            let p = Arc::clone(&pool);
            let s = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                p.reaper_loop(s).await;
            }));
        }

        for t in tasks {
            let _ = t.await;
        }
        info!("worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: &str, mut shutdown: watch::Receiver<bool>) {
        let kinds = self.kinds();
        let mut interval = tokio::time::interval(self.opts.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let leased = match self.queue.lease(
                        worker_id,
                        &kinds,
                        self.opts.batch_size,
                        self.opts.lease_duration,
                    ) {
                        Ok(jobs) => jobs,
                        Err(e) => {
                            error!(worker = worker_id, error = %e, "lease failed");
                            continue;
                        }
                    };
                    for job in leased {
                        if *shutdown.borrow() {
                            // Shutting down mid-batch: give the job back.
                            let _ = self.queue.reschedule(&job.id, Utc::now());
                            continue;
                        }
                        self.execute(worker_id, &job).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(worker = worker_id, "worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn execute(&self, worker_id: &str, job: &Job) {
        let Some(handler) = self.handlers.get(&job.kind) else {
            // A pool leases only registered kinds, so this is a wiring bug.
            let _ = self
                .queue
                .fail(&job.id, &format!("no handler for kind {}", job.kind), false, None);
            return;
        };

        debug!(worker = worker_id, job_id = %job.id, kind = %job.kind, attempt = job.attempts, "executing job");

        // Keep the lease alive while the handler runs; session sends can
        // legitimately outlast one lease window while queued behind a gap.
        let heartbeat = {
            let queue = Arc::clone(&self.queue);
            let job_id = job.id.clone();
            let lease = self.opts.lease_duration;
            tokio::spawn(async move {
                let period = (lease / 2).max(Duration::from_millis(500));
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if queue.heartbeat(&job_id, lease).is_err() {
                        break;
                    }
                }
            })
        };

        let disposition =
            match tokio::time::timeout(self.opts.job_timeout, handler.run(job)).await {
                Ok(d) => d,
                Err(_) => JobDisposition::Retry {
                    error: format!(
                        "job deadline exceeded after {}s",
                        self.opts.job_timeout.as_secs()
                    ),
                },
            };
        heartbeat.abort();

        let applied: Result<()> = match disposition {
            JobDisposition::Complete => self.queue.complete(&job.id),
            JobDisposition::Reschedule { run_after } => {
                self.queue.reschedule(&job.id, run_after)
            }
            JobDisposition::Retry { error } => {
                self.queue.fail(&job.id, &error, true, None).map(|_| ())
            }
            JobDisposition::RetryAfter { error, delay } => self
                .queue
                .fail(&job.id, &error, true, Some(delay))
                .map(|_| ()),
            JobDisposition::Fail { error } => {
                self.queue.fail(&job.id, &error, false, None).map(|_| ())
            }
            JobDisposition::Dead { error } => self.queue.fail_dead(&job.id, &error),
        };

        if let Err(e) = applied {
            error!(job_id = %job.id, error = %e, "failed to record job disposition");
        }
    }

    async fn reaper_loop(&self, mut shutdown: watch::Receiver<bool>) {
        // Reap on the lease cadence; precision is not important here.
        let mut interval = tokio::time::interval(self.opts.lease_duration);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.queue.reap_expired(self.opts.reap_grace) {
                        warn!(error = %e, "lease reaper failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EnqueueOptions;
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        runs: AtomicUsize,
        disposition: JobDisposition,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn kind(&self) -> JobKind {
            JobKind::Cleanup
        }

        async fn run(&self, _job: &Job) -> JobDisposition {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.disposition.clone()
        }
    }

    fn pool_with(
        disposition: JobDisposition,
    ) -> (Arc<JobQueue>, Arc<CountingHandler>, WorkerPool) {
        let queue = Arc::new(JobQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        let handler = Arc::new(CountingHandler {
            runs: AtomicUsize::new(0),
            disposition,
        });
        let mut pool = WorkerPool::new(
            Arc::clone(&queue),
            WorkerOptions {
                count: 2,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        pool.register(Arc::clone(&handler) as Arc<dyn JobHandler>);
        (queue, handler, pool)
    }

    #[tokio::test]
    async fn pool_executes_and_completes_a_job() {
        let (queue, handler, pool) = pool_with(JobDisposition::Complete);
        let id = queue
            .enqueue(JobKind::Cleanup, json!({}), EnqueueOptions::default())
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(pool.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        run.await.unwrap();

        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get(&id).unwrap().status, crate::JobStatus::Completed);
    }

    #[tokio::test]
    async fn retry_disposition_reschedules_with_backoff() {
        let (queue, handler, pool) = pool_with(JobDisposition::Retry {
            error: "flaky".to_string(),
        });
        let id = queue
            .enqueue(JobKind::Cleanup, json!({}), EnqueueOptions::default())
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(pool.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        run.await.unwrap();

        // Ran once, then backed off 60 s — so exactly one execution.
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        let job = queue.get(&id).unwrap();
        assert_eq!(job.status, crate::JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn dead_disposition_is_never_retried() {
        let (queue, handler, pool) = pool_with(JobDisposition::Dead {
            error: "poison".to_string(),
        });
        let id = queue
            .enqueue(JobKind::Cleanup, json!({}), EnqueueOptions::default())
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(pool.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        run.await.unwrap();

        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get(&id).unwrap().status, crate::JobStatus::Dead);
    }
}
