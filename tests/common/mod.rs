//! Shared test harness for engine integration tests
//!
//! Builds an engine over an in-memory database and mock session clients,
//! with millisecond-scale pacing so scenarios finish quickly.

// Not every test crate uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use groupcast::client::mock::{MockClient, MockFactory};
use groupcast::client::GroupSnapshot;
use groupcast::clock::now_ms;
use groupcast::config::{Config, DatabaseConfig};
use groupcast::db::Database;
use groupcast::engine::{BroadcastEngine, Job, JobStatus};
use groupcast::types::{AdId, AdStatus, GroupId, GroupKind, SessionId, TenantId};

pub struct Harness {
    pub db: Database,
    pub factory: Arc<MockFactory>,
    pub engine: Arc<BroadcastEngine>,
}

/// Millisecond-scale engine config: 50 ms fixed inter-group delay, 200 ms
/// round pause, 20 ms poll steps.
pub fn fast_config() -> Config {
    let mut config = Config {
        database: DatabaseConfig {
            path: ":memory:".to_string(),
        },
        engine: Default::default(),
        client: Default::default(),
    };
    config.engine.min_group_delay_ms = 50;
    config.engine.max_group_delay_ms = 50;
    config.engine.round_pause_ms = 200;
    config.engine.round_pause_jitter_ms = 0;
    config.engine.stop_poll_ms = 20;
    config.engine.pause_poll_ms = 20;
    config
}

/// Same as [`fast_config`] but with a round pause long enough that only the
/// first round runs during a test.
pub fn single_round_config() -> Config {
    let mut config = fast_config();
    config.engine.round_pause_ms = 60_000;
    config
}

pub async fn harness(config: Config) -> Harness {
    let db = Database::new(":memory:").await.unwrap();
    let factory = Arc::new(MockFactory::new());
    let engine = Arc::new(BroadcastEngine::new(
        db.clone(),
        Arc::new(config),
        Arc::clone(&factory) as Arc<dyn groupcast::client::ClientFactory>,
    ));
    Harness {
        db,
        factory,
        engine,
    }
}

pub fn snapshot(platform_id: i64) -> GroupSnapshot {
    GroupSnapshot {
        platform_id,
        title: format!("group {}", platform_id),
        kind: GroupKind::Supergroup,
        member_count: 100,
        username: None,
    }
}

impl Harness {
    pub async fn tenant(&self, name: &str) -> TenantId {
        self.db.create_tenant(name, false, None).await.unwrap()
    }

    pub async fn branded_tenant(&self, name: &str, brand: &str) -> TenantId {
        self.db.create_tenant(name, true, Some(brand)).await.unwrap()
    }

    /// Create an active session with `group_count` groups whose platform ids
    /// are `base_platform_id - 0..group_count`, plus a registered mock
    /// client for it.
    pub async fn session_with_groups(
        &self,
        tenant: TenantId,
        group_count: i64,
        base_platform_id: i64,
    ) -> (SessionId, Vec<GroupId>, Arc<MockClient>) {
        let session_id = self
            .db
            .create_session(tenant, "session", "+15550000")
            .await
            .unwrap();
        self.db
            .activate_session(session_id, "opaque-credential")
            .await
            .unwrap();

        let snapshots: Vec<_> = (0..group_count)
            .map(|i| snapshot(base_platform_id - i))
            .collect();
        self.db
            .batch_add_groups(session_id, &snapshots, now_ms())
            .await
            .unwrap();

        let mut group_ids = Vec::new();
        for snap in &snapshots {
            let group = self
                .db
                .find_group(session_id, snap.platform_id)
                .await
                .unwrap()
                .unwrap();
            group_ids.push(group.id);
        }

        let client = self.factory.register(MockClient::new(session_id));
        (session_id, group_ids, client)
    }

    pub async fn active_ad(&self, tenant: TenantId, content: &str) -> AdId {
        let ad_id = self.db.create_ad(tenant, "test ad", content).await.unwrap();
        self.db
            .update_ad_status(ad_id, AdStatus::Active)
            .await
            .unwrap();
        ad_id
    }
}

/// Poll until the job reaches `status` or panic after `timeout`.
pub async fn wait_for_status(job: &Arc<Job>, status: JobStatus, timeout: Duration) {
    let start = Instant::now();
    while job.status() != status {
        if start.elapsed() > timeout {
            panic!(
                "job never reached {:?}, still {:?} after {:?}",
                status,
                job.status(),
                timeout
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `cond` holds or panic after `timeout`.
pub async fn wait_until<F>(cond: F, timeout: Duration, what: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
