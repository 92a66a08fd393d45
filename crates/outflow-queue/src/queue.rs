use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use outflow_core::TenantId;

use crate::db::init_db;
use crate::error::{QueueError, Result};
use crate::types::{Job, JobKind, JobStatus};

/// Exponential retry backoff per attempt already consumed: 60 s, 300 s, 900 s.
fn backoff_secs(attempts: u32) -> i64 {
    match attempts {
        0 | 1 => 60,
        2 => 300,
        _ => 900,
    }
}

/// Options for [`JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub tenant_id: Option<TenantId>,
    /// Lower value = higher priority.
    pub priority: i64,
    /// Not leasable before this instant; `None` means now.
    pub run_after: Option<DateTime<Utc>>,
    pub max_attempts: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            priority: 5,
            run_after: None,
            max_attempts: 3,
        }
    }
}

/// Durable, priority-ordered, leased job queue.
///
/// Wraps a single SQLite connection in a `Mutex`; the lease transaction's
/// select-then-update runs under SQLite's single-writer model, which gives
/// the same at-most-one-lease guarantee as `SELECT … FOR UPDATE SKIP LOCKED`
/// on a server database.
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
}

impl JobQueue {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a new PENDING job. Returns the job id.
    pub fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let run_after = opts.run_after.unwrap_or(now).to_rfc3339();
        let payload_json = serde_json::to_string(&payload)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs
             (id, tenant_id, kind, payload, priority, status, attempts,
              max_attempts, run_after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                opts.tenant_id.as_ref().map(|t| t.as_str()),
                kind.as_str(),
                payload_json,
                opts.priority,
                opts.max_attempts,
                run_after,
                now.to_rfc3339(),
            ],
        )?;

        debug!(job_id = %id, kind = %kind, %run_after, "job enqueued");
        Ok(id)
    }

    /// Atomically lease up to `batch_size` due jobs of the given kinds.
    ///
    /// Selected jobs move PENDING → RUNNING with `lease_until = now +
    /// lease_duration` and `attempts` incremented, all in one transaction.
    pub fn lease(
        &self,
        worker_id: &str,
        kinds: &[JobKind],
        batch_size: usize,
        lease_duration: Duration,
    ) -> Result<Vec<Job>> {
        if kinds.is_empty() || batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let lease_until = (now + chrono::Duration::from_std(lease_duration).unwrap_or_else(|_| chrono::Duration::zero()))
            .to_rfc3339();

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let kind_list = kinds
            .iter()
            .map(|k| format!("'{}'", k.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        // Job kinds are a closed enum, so interpolating the quoted list is
        // safe; everything else is bound.
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM jobs
                 WHERE status = 'pending'
                   AND run_after <= ?1
                   AND (lease_until IS NULL OR lease_until < ?1)
                   AND kind IN ({kind_list})
                 ORDER BY priority ASC, run_after ASC, id ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![now_str, batch_size as i64],
                |row| row.get::<_, String>(0),
            )?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let mut leased = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE jobs
                 SET status = 'running',
                     lease_until = ?1,
                     started_at = COALESCE(started_at, ?2),
                     attempts = attempts + 1
                 WHERE id = ?3 AND status = 'pending'",
                rusqlite::params![lease_until, now_str, id],
            )?;
            leased.push(row_to_job(&tx.query_row(
                "SELECT id, tenant_id, kind, payload, priority, status, attempts,
                        max_attempts, run_after, lease_until, started_at,
                        completed_at, error, created_at
                 FROM jobs WHERE id = ?1",
                rusqlite::params![id],
                row_to_tuple,
            )?)?);
        }
        tx.commit()?;

        if !leased.is_empty() {
            debug!(worker = worker_id, count = leased.len(), "jobs leased");
        }
        Ok(leased)
    }

    /// RUNNING → COMPLETED.
    pub fn complete(&self, job_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs
             SET status = 'completed', completed_at = ?1, lease_until = NULL
             WHERE id = ?2 AND status = 'running'",
            rusqlite::params![now, job_id],
        )?;
        if n == 0 {
            return self.wrong_state(&conn, job_id, "running");
        }
        Ok(())
    }

    /// Record a failure.
    ///
    /// Retryable failures with attempts remaining go back to PENDING with
    /// exponential backoff (`delay_override` substitutes the backoff — used
    /// for quota exhaustion's longer 15-minute pause). Everything else lands
    /// in FAILED.
    pub fn fail(
        &self,
        job_id: &str,
        error: &str,
        retryable: bool,
        delay_override: Option<Duration>,
    ) -> Result<JobStatus> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let (attempts, max_attempts): (u32, u32) = tx
            .query_row(
                "SELECT attempts, max_attempts FROM jobs
                 WHERE id = ?1 AND status = 'running'",
                rusqlite::params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => QueueError::WrongState {
                    id: job_id.to_string(),
                    expected: "running",
                },
                other => QueueError::Database(other),
            })?;

        let status = if retryable && attempts < max_attempts {
            let delay = delay_override
                .map(|d| d.as_secs() as i64)
                .unwrap_or_else(|| backoff_secs(attempts));
            let run_after = (now + chrono::Duration::seconds(delay)).to_rfc3339();
            tx.execute(
                "UPDATE jobs
                 SET status = 'pending', run_after = ?1, lease_until = NULL,
                     error = ?2
                 WHERE id = ?3",
                rusqlite::params![run_after, error, job_id],
            )?;
            info!(job_id, attempts, delay_secs = delay, "job failed, retry scheduled");
            JobStatus::Pending
        } else {
            tx.execute(
                "UPDATE jobs
                 SET status = 'failed', completed_at = ?1, lease_until = NULL,
                     error = ?2
                 WHERE id = ?3",
                rusqlite::params![now.to_rfc3339(), error, job_id],
            )?;
            warn!(job_id, attempts, error, "job failed terminally");
            JobStatus::Failed
        };
        tx.commit()?;
        Ok(status)
    }

    /// RUNNING → DEAD. For poison jobs that must never run again (bad
    /// credentials, corrupted channel config).
    pub fn fail_dead(&self, job_id: &str, error: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs
             SET status = 'dead', completed_at = ?1, lease_until = NULL, error = ?2
             WHERE id = ?3 AND status = 'running'",
            rusqlite::params![now, error, job_id],
        )?;
        if n == 0 {
            return self.wrong_state(&conn, job_id, "running");
        }
        warn!(job_id, error, "job marked dead");
        Ok(())
    }

    /// Put a RUNNING job back to PENDING at `run_after`, refunding the lease's
    /// attempt. Used for soft pauses and send-window waits, which are not
    /// failures and must not eat the retry budget.
    pub fn reschedule(&self, job_id: &str, run_after: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs
             SET status = 'pending', run_after = ?1, lease_until = NULL,
                 attempts = CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END
             WHERE id = ?2 AND status = 'running'",
            rusqlite::params![run_after.to_rfc3339(), job_id],
        )?;
        if n == 0 {
            return self.wrong_state(&conn, job_id, "running");
        }
        Ok(())
    }

    /// Extend the lease of a long-running job.
    pub fn heartbeat(&self, job_id: &str, lease_duration: Duration) -> Result<()> {
        let lease_until = (Utc::now()
            + chrono::Duration::from_std(lease_duration).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET lease_until = ?1 WHERE id = ?2 AND status = 'running'",
            rusqlite::params![lease_until, job_id],
        )?;
        if n == 0 {
            return self.wrong_state(&conn, job_id, "running");
        }
        Ok(())
    }

    /// Return RUNNING jobs whose lease expired more than `grace` ago to
    /// PENDING (worker presumed crashed). The attempt consumed by the dead
    /// lease stays counted. Returns the number of reaped jobs.
    pub fn reap_expired(&self, grace: Duration) -> Result<usize> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs
             SET status = 'pending', lease_until = NULL
             WHERE status = 'running' AND lease_until < ?1",
            rusqlite::params![cutoff],
        )?;
        if n > 0 {
            warn!(count = n, "expired leases reaped back to pending");
        }
        Ok(n)
    }

    /// Delete terminal jobs whose completed_at is older than `days` days.
    /// Returns the number pruned.
    pub fn prune_terminal(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM jobs
             WHERE status IN ('completed', 'failed', 'dead')
               AND completed_at IS NOT NULL AND completed_at < ?1",
            rusqlite::params![cutoff],
        )?;
        if n > 0 {
            info!(count = n, "terminal jobs pruned");
        }
        Ok(n)
    }

    /// Fetch a job by id.
    pub fn get(&self, job_id: &str) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant_id, kind, payload, priority, status, attempts,
                    max_attempts, run_after, lease_until, started_at,
                    completed_at, error, created_at
             FROM jobs WHERE id = ?1",
            rusqlite::params![job_id],
            row_to_tuple,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => QueueError::JobNotFound {
                id: job_id.to_string(),
            },
            other => QueueError::Database(other),
        })
        .and_then(|t| row_to_job(&t))
    }

    /// All PENDING or RUNNING jobs of `kind`. Used to keep singleton jobs
    /// (reply polls, cleanup) singleton.
    pub fn find_live(&self, kind: JobKind) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, kind, payload, priority, status, attempts,
                    max_attempts, run_after, lease_until, started_at,
                    completed_at, error, created_at
             FROM jobs
             WHERE kind = ?1 AND status IN ('pending', 'running')
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![kind.as_str()], row_to_tuple)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|t| row_to_job(&t).ok())
            .collect())
    }

    fn wrong_state(&self, conn: &Connection, job_id: &str, expected: &'static str) -> Result<()> {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM jobs WHERE id = ?1",
                rusqlite::params![job_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if exists {
            Err(QueueError::WrongState {
                id: job_id.to_string(),
                expected,
            })
        } else {
            Err(QueueError::JobNotFound {
                id: job_id.to_string(),
            })
        }
    }
}

type JobTuple = (
    String,
    Option<String>,
    String,
    String,
    i64,
    String,
    u32,
    u32,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

fn row_to_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn row_to_job(t: &JobTuple) -> Result<Job> {
    let kind = JobKind::from_str(&t.2)
        .map_err(|e| QueueError::Database(rusqlite::Error::InvalidParameterName(e)))?;
    let status = JobStatus::from_str(&t.5)
        .map_err(|e| QueueError::Database(rusqlite::Error::InvalidParameterName(e)))?;
    Ok(Job {
        id: t.0.clone(),
        tenant_id: t.1.clone(),
        kind,
        payload: serde_json::from_str(&t.3)?,
        priority: t.4,
        status,
        attempts: t.6,
        max_attempts: t.7,
        run_after: t.8.clone(),
        lease_until: t.9.clone(),
        started_at: t.10.clone(),
        completed_at: t.11.clone(),
        error: t.12.clone(),
        created_at: t.13.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> JobQueue {
        JobQueue::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn lease_on_empty_queue_is_a_noop() {
        let q = queue();
        let jobs = q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn lease_orders_by_priority_then_run_after_then_id() {
        let q = queue();
        let past = Utc::now() - chrono::Duration::seconds(30);
        let low = q
            .enqueue(
                JobKind::CampaignStep,
                json!({"n": 1}),
                EnqueueOptions {
                    priority: 9,
                    run_after: Some(past),
                    ..Default::default()
                },
            )
            .unwrap();
        let high = q
            .enqueue(
                JobKind::CampaignStep,
                json!({"n": 2}),
                EnqueueOptions {
                    priority: 1,
                    run_after: Some(past),
                    ..Default::default()
                },
            )
            .unwrap();

        let jobs = q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, high);
        assert_eq!(jobs[1].id, low);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Running));
        assert!(jobs.iter().all(|j| j.attempts == 1));
    }

    #[test]
    fn future_jobs_are_not_leased() {
        let q = queue();
        q.enqueue(
            JobKind::CampaignStep,
            json!({}),
            EnqueueOptions {
                run_after: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn a_leased_job_cannot_be_leased_again() {
        let q = queue();
        q.enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        let first = q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap();
        assert_eq!(first.len(), 1);
        let second = q
            .lease("w2", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn kind_filter_is_respected() {
        let q = queue();
        q.enqueue(JobKind::PollReplies, json!({}), EnqueueOptions::default())
            .unwrap();
        assert!(q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap()
            .is_empty());
        assert_eq!(
            q.lease("w1", &[JobKind::PollReplies], 10, LEASE)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn complete_finishes_the_job() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, LEASE).unwrap();
        q.complete(&id).unwrap();

        let job = q.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        // Terminal jobs are never leased again.
        assert!(q
            .lease("w1", &[JobKind::CampaignStep], 10, LEASE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn retryable_failure_backs_off_60_then_300_then_900() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();

        for expected_delay in [60i64, 300, 900] {
            // Make the job due immediately so lease picks it up.
            {
                let conn = q.conn.lock().unwrap();
                conn.execute(
                    "UPDATE jobs SET run_after = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
                        id
                    ],
                )
                .unwrap();
            }
            let leased = q
                .lease("w1", &[JobKind::CampaignStep], 1, LEASE)
                .unwrap();
            if leased.is_empty() {
                break;
            }
            let before = Utc::now();
            let status = q.fail(&id, "smtp timeout", true, None).unwrap();
            let job = q.get(&id).unwrap();
            if status == JobStatus::Pending {
                let run_after: DateTime<Utc> =
                    job.run_after.parse::<DateTime<Utc>>().unwrap();
                let delta = (run_after - before).num_seconds();
                assert!(
                    (delta - expected_delay).abs() <= 2,
                    "expected ~{expected_delay}s backoff, got {delta}s"
                );
            }
        }

        // Third failure exhausted the budget (attempts == max_attempts == 3).
        let job = q.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error.as_deref(), Some("smtp timeout"));
    }

    #[test]
    fn delay_override_wins_over_backoff() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, LEASE).unwrap();
        let before = Utc::now();
        q.fail(&id, "quota", true, Some(Duration::from_secs(900)))
            .unwrap();
        let job = q.get(&id).unwrap();
        let run_after: DateTime<Utc> = job.run_after.parse::<DateTime<Utc>>().unwrap();
        assert!((run_after - before).num_seconds() >= 898);
    }

    #[test]
    fn non_retryable_failure_is_terminal() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, LEASE).unwrap();
        assert_eq!(
            q.fail(&id, "invalid recipient", false, None).unwrap(),
            JobStatus::Failed
        );
        assert_eq!(q.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn fail_dead_marks_poison() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, LEASE).unwrap();
        q.fail_dead(&id, "credentials corrupted").unwrap();
        assert_eq!(q.get(&id).unwrap().status, JobStatus::Dead);
    }

    #[test]
    fn reschedule_refunds_the_attempt() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, LEASE).unwrap();
        assert_eq!(q.get(&id).unwrap().attempts, 1);

        q.reschedule(&id, Utc::now() + chrono::Duration::seconds(30))
            .unwrap();
        let job = q.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0, "reschedule must not consume the budget");
    }

    #[test]
    fn reaper_returns_expired_leases_to_pending() {
        let q = queue();
        let id = q
            .enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, Duration::from_secs(0))
            .unwrap();

        // Lease expired immediately; a zero grace reaps it.
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(q.reap_expired(Duration::from_secs(0)).unwrap(), 1);
        let job = q.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1, "crashed lease still counts");
    }

    #[test]
    fn reaper_leaves_live_leases_alone() {
        let q = queue();
        q.enqueue(JobKind::CampaignStep, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::CampaignStep], 1, Duration::from_secs(300))
            .unwrap();
        assert_eq!(q.reap_expired(Duration::from_secs(30)).unwrap(), 0);
    }

    #[test]
    fn find_live_sees_pending_and_running_only() {
        let q = queue();
        let a = q
            .enqueue(JobKind::PollReplies, json!({"c": "a"}), EnqueueOptions::default())
            .unwrap();
        let b = q
            .enqueue(JobKind::PollReplies, json!({"c": "b"}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::PollReplies], 1, LEASE).unwrap();
        q.complete(&a).unwrap();

        let live = q.find_live(JobKind::PollReplies).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, b);
    }

    #[test]
    fn prune_terminal_respects_age() {
        let q = queue();
        let id = q
            .enqueue(JobKind::Cleanup, json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("w1", &[JobKind::Cleanup], 1, LEASE).unwrap();
        q.complete(&id).unwrap();

        // Fresh terminal job survives a 7-day retention.
        assert_eq!(q.prune_terminal(7).unwrap(), 0);

        // Backdate and prune.
        {
            let conn = q.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET completed_at = ?1 WHERE id = ?2",
                rusqlite::params![
                    (Utc::now() - chrono::Duration::days(30)).to_rfc3339(),
                    id
                ],
            )
            .unwrap();
        }
        assert_eq!(q.prune_terminal(7).unwrap(), 1);
    }
}
