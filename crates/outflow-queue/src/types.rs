use serde::{Deserialize, Serialize};

/// The work categories the queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// One step of one campaign recipient. Payload: `{recipient_id,
    /// campaign_id, tenant_id}`.
    CampaignStep,
    /// Lead ingestion scrape (enqueued by the ingestion subsystem).
    Scrape,
    /// Inbound polling for one session-based channel config. Payload:
    /// `{channel_config_id, tenant_id}`.
    PollReplies,
    /// Outbound webhook delivery (enqueued by the webhook subsystem).
    Webhook,
    /// Retention pruning; re-enqueues itself daily.
    Cleanup,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CampaignStep => "CAMPAIGN_STEP",
            JobKind::Scrape => "SCRAPE",
            JobKind::PollReplies => "POLL_REPLIES",
            JobKind::Webhook => "WEBHOOK",
            JobKind::Cleanup => "CLEANUP",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CAMPAIGN_STEP" => Ok(JobKind::CampaignStep),
            "SCRAPE" => Ok(JobKind::Scrape),
            "POLL_REPLIES" => Ok(JobKind::PollReplies),
            "WEBHOOK" => Ok(JobKind::Webhook),
            "CLEANUP" => Ok(JobKind::Cleanup),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for run_after; leasable.
    Pending,
    /// Leased by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Retries exhausted or permanent failure.
    Failed,
    /// Poison — a failure that must never be retried (bad credentials,
    /// corrupted config).
    Dead,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Dead
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Owning tenant, if the work is tenant-scoped.
    pub tenant_id: Option<String>,
    pub kind: JobKind,
    /// Opaque JSON payload interpreted by the handler for `kind`.
    pub payload: serde_json::Value,
    /// Lower value = higher priority.
    pub priority: i64,
    pub status: JobStatus,
    /// Times this job has been leased.
    pub attempts: u32,
    pub max_attempts: u32,
    /// ISO-8601: not leasable before this instant.
    pub run_after: String,
    /// ISO-8601 lease expiry while RUNNING.
    pub lease_until: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Last failure, verbatim.
    pub error: Option<String>,
    pub created_at: String,
}
