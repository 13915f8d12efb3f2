//! Broadcast engine
//!
//! The public façade over the posting machinery. Owns the in-memory job
//! registry, the connected client pool and the per-session rate registry;
//! everything is a field of one engine value, constructed once and shared
//! via `Arc`. No process-wide mutable state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{ClientFactory, SessionClient};
use crate::clock::now_ms;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ClientError, GroupcastError, Result};
use crate::throttle::RateRegistry;
use crate::types::{Ad, AdId, AdStatus, GroupId, Session, SessionId, TenantId};

pub mod events;
pub mod job;
mod driver;
mod outcome;
mod round;

pub use events::{Event, EventBus, EventReceiver};
pub use job::{Job, JobStats, JobStatus, LogEntry, LogKind};

pub(crate) struct EngineShared {
    pub(crate) db: Database,
    pub(crate) config: Arc<Config>,
    pub(crate) factory: Arc<dyn ClientFactory>,
    pub(crate) clients: RwLock<HashMap<SessionId, Arc<dyn SessionClient>>>,
    pub(crate) limiter: RateRegistry,
    pub(crate) jobs: RwLock<HashMap<String, Arc<Job>>>,
    pub(crate) events: EventBus,
}

impl EngineShared {
    pub(crate) async fn client_for(&self, session_id: SessionId) -> Option<Arc<dyn SessionClient>> {
        self.clients.read().await.get(&session_id).cloned()
    }

    pub(crate) async fn evict_client(&self, session_id: SessionId) {
        if let Some(client) = self.clients.write().await.remove(&session_id) {
            let _ = client.disconnect().await;
        }
    }
}

/// The broadcast orchestrator.
pub struct BroadcastEngine {
    shared: Arc<EngineShared>,
}

impl BroadcastEngine {
    pub fn new(db: Database, config: Arc<Config>, factory: Arc<dyn ClientFactory>) -> Self {
        let limiter = RateRegistry::new(&config.engine);
        Self {
            shared: Arc::new(EngineShared {
                db,
                config,
                factory,
                clients: RwLock::new(HashMap::new()),
                limiter,
                jobs: RwLock::new(HashMap::new()),
                events: EventBus::new(256),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Start broadcasting `ad_id` across every usable session of the tenant.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the ad does not exist or belongs to someone else
    /// - `InvalidInput` for empty content or a closed/archived ad
    /// - `JobAlreadyRunning` when a live job already covers this ad
    /// - `NoUsableSession` when no session connects
    /// - `NoDeliverableGroup` when the resolved group set is empty
    pub async fn start_posting(&self, tenant_id: TenantId, ad_id: AdId) -> Result<Arc<Job>> {
        let ad = self.load_tenant_ad(tenant_id, ad_id).await?;

        if ad.content.trim().is_empty() {
            return Err(GroupcastError::InvalidInput(
                "ad content is empty".to_string(),
            ));
        }
        // Paused stays broadcastable: the scheduled publisher starts paused
        // ads and flips them Active on success.
        if matches!(
            ad.status,
            AdStatus::Draft | AdStatus::Closed | AdStatus::SoldOut | AdStatus::Archived
        ) {
            return Err(GroupcastError::InvalidInput(format!(
                "ad {} is not in a broadcastable status",
                ad.id
            )));
        }

        self.ensure_no_live_job(tenant_id, ad_id).await?;

        let sessions = self.connect_tenant_sessions(tenant_id).await?;

        // Count the initial deliverable set; rounds re-resolve it later.
        let now = now_ms();
        let selected = ad.selected_group_ids();
        let mut total: u64 = 0;
        for session in &sessions {
            let mut groups = self
                .shared
                .db
                .list_deliverable_groups(session.id, now)
                .await?;
            if let Some(ref ids) = selected {
                groups.retain(|g| ids.contains(&g.id));
            }
            if ad.use_priority_groups {
                groups.retain(|g| g.is_priority);
            }
            total += groups.len() as u64;
        }
        if total == 0 {
            return Err(GroupcastError::NoDeliverableGroup);
        }

        self.spawn_job(tenant_id, ad, sessions, total, None, None)
            .await
    }

    /// Re-drive only the groups whose delivery failed for `post_id`, as a
    /// single bounded round.
    pub async fn retry_failed(&self, tenant_id: TenantId, post_id: &str) -> Result<Arc<Job>> {
        let post = self
            .shared
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| GroupcastError::NotFound(format!("post {}", post_id)))?;
        let ad = self.load_tenant_ad(tenant_id, post.ad_id).await?;

        self.ensure_no_live_job(tenant_id, ad.id).await?;

        let failed: HashSet<GroupId> = self
            .shared
            .db
            .list_failed_group_ids(post_id)
            .await?
            .into_iter()
            .collect();
        if failed.is_empty() {
            return Err(GroupcastError::NoDeliverableGroup);
        }

        let sessions = self.connect_tenant_sessions(tenant_id).await?;

        self.spawn_job(
            tenant_id,
            ad,
            sessions,
            failed.len() as u64,
            Some(failed),
            Some(1),
        )
        .await
    }

    /// Idempotent, sticky stop.
    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        let job = self.require_job(job_id).await?;
        job.request_stop();
        Ok(())
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<()> {
        let job = self.require_job(job_id).await?;
        job.request_pause();
        self.shared.events.emit(Event::JobPaused {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<()> {
        let job = self.require_job(job_id).await?;
        job.request_resume();
        self.shared.events.emit(Event::JobResumed {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Arc<Job>> {
        self.shared.jobs.read().await.get(job_id).cloned()
    }

    pub async fn tenant_jobs(&self, tenant_id: TenantId) -> Vec<Arc<Job>> {
        self.shared
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn job_stats(&self, job_id: &str) -> Option<JobStats> {
        self.get_job(job_id).await.map(|j| j.stats())
    }

    /// Newest `limit` log entries of the job, oldest first.
    pub async fn job_logs(&self, job_id: &str, limit: usize) -> Option<Vec<LogEntry>> {
        self.get_job(job_id).await.map(|j| j.log_tail(limit))
    }

    /// Drop a finished job from the registry.
    pub async fn cleanup_job(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.shared.jobs.write().await;
        let job = jobs
            .get(job_id)
            .ok_or_else(|| GroupcastError::NotFound(format!("job {}", job_id)))?;

        if !job.status().is_terminal() {
            return Err(GroupcastError::InvalidInput(format!(
                "job {} is still {}",
                job_id,
                job.status().as_str()
            )));
        }

        jobs.remove(job_id);
        Ok(())
    }

    /// Diagnostic view of a session's throttle state.
    pub fn rate_state(&self, session_id: SessionId) -> crate::throttle::SessionRateState {
        self.shared.limiter.snapshot(session_id)
    }

    async fn load_tenant_ad(&self, tenant_id: TenantId, ad_id: AdId) -> Result<Ad> {
        let ad = self
            .shared
            .db
            .get_ad(ad_id)
            .await?
            .ok_or_else(|| GroupcastError::NotFound(format!("ad {}", ad_id)))?;
        // Tenant isolation: a foreign ad is indistinguishable from a missing one.
        if ad.tenant_id != tenant_id {
            return Err(GroupcastError::NotFound(format!("ad {}", ad_id)));
        }
        Ok(ad)
    }

    /// At most one live job per (tenant, ad). Advisory, enforced against the
    /// in-memory registry.
    async fn ensure_no_live_job(&self, tenant_id: TenantId, ad_id: AdId) -> Result<()> {
        let jobs = self.shared.jobs.read().await;
        for job in jobs.values() {
            if job.tenant_id == tenant_id && job.ad.id == ad_id && !job.status().is_terminal() {
                return Err(GroupcastError::JobAlreadyRunning(ad_id));
            }
        }
        Ok(())
    }

    /// Resolve the tenant's usable sessions and lazily connect each one.
    /// Sessions that fail to connect are logged and excluded.
    async fn connect_tenant_sessions(&self, tenant_id: TenantId) -> Result<Vec<Session>> {
        let sessions = self.shared.db.list_usable_sessions(tenant_id).await?;
        let mut connected = Vec::new();

        for session in sessions {
            match self.ensure_client(&session).await {
                Ok(_) => connected.push(session),
                Err(e) => {
                    warn!(session_id = session.id, error = %e, "session excluded from job");
                }
            }
        }

        if connected.is_empty() {
            return Err(GroupcastError::NoUsableSession);
        }
        Ok(connected)
    }

    async fn ensure_client(&self, session: &Session) -> Result<Arc<dyn SessionClient>> {
        if let Some(client) = self.shared.client_for(session.id).await {
            if client.is_connected() {
                return Ok(client);
            }
        }

        let client = self.shared.factory.create(session).await?;
        let retries = self.shared.config.client.connection_retries.max(1);
        let timeout = Duration::from_millis(self.shared.config.client.connect_timeout_ms);

        let mut last_error = ClientError::Connect("no attempt made".to_string());
        for attempt in 1..=retries {
            match tokio::time::timeout(timeout, client.connect()).await {
                Ok(Ok(())) => {
                    self.shared
                        .clients
                        .write()
                        .await
                        .insert(session.id, Arc::clone(&client));
                    return Ok(client);
                }
                Ok(Err(e)) => {
                    warn!(
                        session_id = session.id,
                        attempt, error = %e,
                        "connect attempt failed"
                    );
                    last_error = e;
                }
                Err(_) => {
                    last_error = ClientError::Connect("connect timeout".to_string());
                }
            }
        }

        Err(last_error.into())
    }

    async fn spawn_job(
        &self,
        tenant_id: TenantId,
        ad: Ad,
        sessions: Vec<Session>,
        total_groups: u64,
        restrict_groups: Option<HashSet<GroupId>>,
        max_rounds: Option<u64>,
    ) -> Result<Arc<Job>> {
        let tenant = self
            .shared
            .db
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| GroupcastError::NotFound(format!("tenant {}", tenant_id)))?;

        let mut content = ad.content.clone();
        if tenant.brand_ad_enabled {
            if let Some(brand) = tenant.brand_ad_text.as_deref().filter(|t| !t.is_empty()) {
                content.push_str("\n\n");
                content.push_str(brand);
            }
        }

        let subscription = self.shared.db.get_active_subscription(tenant_id).await?;
        let engine = &self.shared.config.engine;
        let min_delay = ad
            .interval_min
            .map(|v| v as u64)
            .unwrap_or(engine.min_group_delay_ms);
        let max_delay = ad
            .interval_max
            .map(|v| v as u64)
            .unwrap_or(engine.max_group_delay_ms)
            .max(min_delay);
        let group_cooldown = ad
            .group_interval
            .or(subscription.and_then(|s| s.group_interval))
            .map(|v| v as u64)
            .unwrap_or(engine.group_cooldown_ms);

        let primary_session = sessions[0].id;
        let now = now_ms();
        let post_id = self
            .shared
            .db
            .create_post(ad.id, primary_session, total_groups as i64, now)
            .await?;
        self.shared.db.start_post(&post_id, now).await?;

        let job = Arc::new(Job::new(job::JobSeed {
            tenant_id,
            ad,
            content,
            post_id: post_id.clone(),
            restrict_groups,
            max_rounds,
            min_group_delay_ms: min_delay,
            max_group_delay_ms: max_delay,
            group_cooldown_ms: group_cooldown,
            log_cap: engine.max_job_log_entries,
            log_trim_to: engine.job_log_trim_to,
        }));
        job.set_total_groups(total_groups);
        job.push_log(LogEntry::info(format!(
            "job started across {} session(s), {} group(s)",
            sessions.len(),
            total_groups
        )));

        self.shared
            .jobs
            .write()
            .await
            .insert(job.id.clone(), Arc::clone(&job));

        info!(
            job_id = %job.id,
            post_id = %post_id,
            tenant_id,
            total_groups,
            "broadcast job starting"
        );
        self.shared.events.emit(Event::JobStarted {
            job_id: job.id.clone(),
            post_id,
            total_groups,
        });

        tokio::spawn(round::run_job(
            Arc::clone(&self.shared),
            Arc::clone(&job),
        ));

        Ok(job)
    }

    async fn require_job(&self, job_id: &str) -> Result<Arc<Job>> {
        self.get_job(job_id)
            .await
            .ok_or_else(|| GroupcastError::NotFound(format!("job {}", job_id)))
    }
}
