use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::queue::{EnqueueOptions, JobQueue};
use crate::types::{Job, JobKind};
use crate::worker::{JobDisposition, JobHandler};

/// Retention pruning. One CLEANUP job exists at a time; each run prunes
/// terminal jobs past the retention window and reschedules itself a day out.
pub struct CleanupHandler {
    queue: Arc<JobQueue>,
    retention_days: i64,
}

impl CleanupHandler {
    pub fn new(queue: Arc<JobQueue>, retention_days: i64) -> Self {
        Self {
            queue,
            retention_days,
        }
    }

    /// Enqueue the singleton CLEANUP job if none is live. Called at boot.
    pub fn ensure_scheduled(queue: &JobQueue) -> Result<()> {
        if queue.find_live(JobKind::Cleanup)?.is_empty() {
            queue.enqueue(JobKind::Cleanup, json!({}), EnqueueOptions::default())?;
            info!("cleanup job scheduled");
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    fn kind(&self) -> JobKind {
        JobKind::Cleanup
    }

    async fn run(&self, _job: &Job) -> JobDisposition {
        match self.queue.prune_terminal(self.retention_days) {
            Ok(pruned) => {
                if pruned > 0 {
                    info!(pruned, "retention pruning complete");
                }
                JobDisposition::Reschedule {
                    run_after: Utc::now() + Duration::days(1),
                }
            }
            Err(e) => JobDisposition::Retry {
                error: format!("prune failed: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn ensure_scheduled_is_singleton() {
        let queue = JobQueue::new(Connection::open_in_memory().unwrap()).unwrap();
        CleanupHandler::ensure_scheduled(&queue).unwrap();
        CleanupHandler::ensure_scheduled(&queue).unwrap();
        assert_eq!(queue.find_live(JobKind::Cleanup).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_reschedules_a_day_out() {
        let queue = Arc::new(JobQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        CleanupHandler::ensure_scheduled(&queue).unwrap();
        let job = queue
            .lease("t", &[JobKind::Cleanup], 1, std::time::Duration::from_secs(60))
            .unwrap()
            .remove(0);

        let handler = CleanupHandler::new(Arc::clone(&queue), 7);
        match handler.run(&job).await {
            JobDisposition::Reschedule { run_after } => {
                assert!((run_after - Utc::now()).num_hours() >= 23);
            }
            other => panic!("expected Reschedule, got {other:?}"),
        }
    }
}
