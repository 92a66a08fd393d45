//! `outflow-queue` — durable job queue with leases, backed by SQLite.
//!
//! # Overview
//!
//! Jobs are persisted to a `jobs` table. Workers call [`JobQueue::lease`] on
//! a poll cadence; leasing is a single transaction that selects due PENDING
//! rows (ordered by priority, run_after, id), marks them RUNNING and stamps a
//! lease expiry, so any given job is held by at most one worker. Failed jobs
//! retry with exponential backoff (60 s, 300 s, 900 s) until `max_attempts`;
//! a background reaper returns crashed workers' expired leases to PENDING.
//!
//! # Lifecycle
//!
//! | Transition                      | Caller                    |
//! |---------------------------------|---------------------------|
//! | PENDING → RUNNING               | `lease`                   |
//! | RUNNING → COMPLETED             | `complete`                |
//! | RUNNING → PENDING (backoff)     | `fail(retryable = true)`  |
//! | RUNNING → PENDING (no attempt)  | `reschedule`, reaper      |
//! | RUNNING → FAILED / DEAD         | `fail` / `fail_dead`      |

pub mod db;
pub mod error;
pub mod maintenance;
pub mod queue;
pub mod types;
pub mod worker;

pub use error::{QueueError, Result};
pub use maintenance::CleanupHandler;
pub use queue::{EnqueueOptions, JobQueue};
pub use types::{Job, JobKind, JobStatus};
pub use worker::{JobDisposition, JobHandler, WorkerOptions, WorkerPool};
