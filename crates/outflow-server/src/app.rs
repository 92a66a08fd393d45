use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use outflow_campaigns::{CampaignEngine, CampaignStore, StepJobHandler};
use outflow_channels::{ChannelStore, Dispatcher};
use outflow_contacts::ContactStore;
use outflow_core::OutflowConfig;
use outflow_queue::{CleanupHandler, JobQueue, WorkerOptions, WorkerPool};
use outflow_replies::ReplyPoller;
use outflow_sessions::SessionRegistry;
use outflow_vault::CredentialVault;

/// Central shared state: one instance of every subsystem, wired at boot and
/// handed out behind `Arc`s. Nothing here is global; the admin surface (out
/// of process) drives these through its own transport.
pub struct AppState {
    pub config: OutflowConfig,
    pub queue: Arc<JobQueue>,
    pub contacts: Arc<ContactStore>,
    pub channels: Arc<ChannelStore>,
    pub campaigns: Arc<CampaignStore>,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub engine: Arc<CampaignEngine>,
    pub poller: Arc<ReplyPoller>,
}

impl AppState {
    pub fn new(config: OutflowConfig) -> anyhow::Result<Self> {
        let vault = Arc::new(CredentialVault::from_hex(&config.vault.key_hex)?);

        // Each store owns its own connection to the shared database file;
        // WAL keeps the concurrent readers and the single writer happy.
        let db_path = PathBuf::from(&config.database.path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let queue = Arc::new(JobQueue::new(open_db(&db_path)?)?);
        let contacts = Arc::new(ContactStore::new(open_db(&db_path)?)?);
        let channels = Arc::new(ChannelStore::new(open_db(&db_path)?, Arc::clone(&vault))?);
        let campaigns = Arc::new(CampaignStore::new(open_db(&db_path)?)?);

        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&channels),
            PathBuf::from(&config.storage.root),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&channels),
            Arc::clone(&registry) as Arc<dyn outflow_channels::SessionSender>,
        ));
        let engine = Arc::new(CampaignEngine::new(
            Arc::clone(&campaigns),
            Arc::clone(&contacts),
            Arc::clone(&channels),
            Arc::clone(&queue),
            Arc::clone(&dispatcher) as Arc<dyn outflow_campaigns::OutboundDispatcher>,
        ));
        let poller = Arc::new(ReplyPoller::new(
            Arc::clone(&channels),
            Arc::clone(&contacts),
            Arc::clone(&campaigns),
            Arc::clone(&queue),
            Arc::clone(&registry) as Arc<dyn outflow_replies::InboundSource>,
        ));

        Ok(Self {
            config,
            queue,
            contacts,
            channels,
            campaigns,
            registry,
            dispatcher,
            engine,
            poller,
        })
    }

    /// Build the worker pool with every handler registered.
    pub fn worker_pool(&self) -> WorkerPool {
        let opts = WorkerOptions {
            count: self.config.workers.count,
            poll_interval: Duration::from_secs(
                self.config.workers.poll_interval_secs.clamp(5, 30),
            ),
            lease_duration: Duration::from_secs(self.config.workers.lease_secs),
            job_timeout: Duration::from_secs(self.config.workers.job_timeout_secs),
            ..Default::default()
        };
        let mut pool = WorkerPool::new(Arc::clone(&self.queue), opts);
        pool.register(Arc::new(StepJobHandler::new(Arc::clone(&self.engine))));
        pool.register(Arc::clone(&self.poller) as Arc<dyn outflow_queue::JobHandler>);
        pool.register(Arc::new(CleanupHandler::new(
            Arc::clone(&self.queue),
            self.config.retention.completed_job_days,
        )));
        pool
    }
}

fn open_db(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}
