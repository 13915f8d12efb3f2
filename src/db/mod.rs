//! Database operations for Groupcast
//!
//! The repository boundary: every row the engine reads or writes goes
//! through [`Database`]. Entity-specific queries live in the submodules;
//! they are all `impl Database` blocks over the same pool.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DbError, Result};

mod ads;
mod billing;
mod groups;
mod posts;
mod sessions;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .map_err(DbError::SqlxError)?
        } else {
            let expanded = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded);

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }

            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", expanded))
                .map_err(DbError::SqlxError)?
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .connect_with(options)
                .await
                .map_err(DbError::SqlxError)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use crate::clock::now_ms;
    use crate::types::*;

    pub async fn memory_db() -> Database {
        Database::new(":memory:").await.unwrap()
    }

    pub async fn seed_tenant(db: &Database, name: &str) -> TenantId {
        db.create_tenant(name, false, None).await.unwrap()
    }

    pub async fn seed_session(db: &Database, tenant_id: TenantId, name: &str) -> SessionId {
        let id = db
            .create_session(tenant_id, name, &format!("+1555{}", name.len()))
            .await
            .unwrap();
        db.activate_session(id, "opaque-credential").await.unwrap();
        id
    }

    pub async fn seed_group(db: &Database, session_id: SessionId, platform_id: i64) -> GroupId {
        let snapshot = crate::client::GroupSnapshot {
            platform_id,
            title: format!("group {}", platform_id),
            kind: GroupKind::Supergroup,
            member_count: 100,
            username: None,
        };
        db.batch_add_groups(session_id, &[snapshot], now_ms())
            .await
            .unwrap();
        db.find_group(session_id, platform_id)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    pub async fn seed_ad(db: &Database, tenant_id: TenantId, content: &str) -> AdId {
        let id = db.create_ad(tenant_id, "test ad", content).await.unwrap();
        db.update_ad_status(id, AdStatus::Active).await.unwrap();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::Database;
    use crate::clock::now_ms;
    use crate::types::*;

    #[tokio::test]
    async fn test_migrations_apply_on_fresh_db() {
        let _db = memory_db().await;
    }

    #[tokio::test]
    async fn test_file_backed_db_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("groupcast.db");

        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        seed_tenant(&db, "acme").await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_usable_session_filter() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;

        let usable = seed_session(&db, tenant, "good").await;

        // Created but never authenticated
        db.create_session(tenant, "pending", "+2000").await.unwrap();

        // Frozen
        let frozen = seed_session(&db, tenant, "frozen").await;
        db.freeze_session(frozen, now_ms()).await.unwrap();

        // Banned
        let banned = seed_session(&db, tenant, "banned").await;
        db.ban_session(banned, now_ms()).await.unwrap();

        let sessions = db.list_usable_sessions(tenant).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, usable);
    }

    #[tokio::test]
    async fn test_batch_add_groups_idempotent() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;

        let snapshots: Vec<_> = (1..=3)
            .map(|i| crate::client::GroupSnapshot {
                platform_id: -100 - i,
                title: format!("g{}", i),
                kind: GroupKind::Group,
                member_count: 10 * i,
                username: None,
            })
            .collect();

        db.batch_add_groups(session, &snapshots, 1_000).await.unwrap();
        db.batch_add_groups(session, &snapshots, 2_000).await.unwrap();

        assert_eq!(db.count_groups(session).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_add_groups_refreshes_metadata() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;

        let mut snap = crate::client::GroupSnapshot {
            platform_id: -5,
            title: "old title".to_string(),
            kind: GroupKind::Group,
            member_count: 10,
            username: None,
        };
        db.batch_add_groups(session, &[snap.clone()], 1_000)
            .await
            .unwrap();

        snap.title = "new title".to_string();
        snap.member_count = 99;
        db.batch_add_groups(session, &[snap], 2_000).await.unwrap();

        let group = db.find_group(session, -5).await.unwrap().unwrap();
        assert_eq!(group.title, "new title");
        assert_eq!(group.member_count, 99);
    }

    #[tokio::test]
    async fn test_deliverable_group_filter() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;

        let good = seed_group(&db, session, -1).await;
        let skipped = seed_group(&db, session, -2).await;
        let restricted = seed_group(&db, session, -3).await;
        let expired_restriction = seed_group(&db, session, -4).await;

        db.skip_group(skipped, "write forbidden").await.unwrap();
        db.restrict_group(restricted, "slowmode 600", Some(now_ms() + 600_000))
            .await
            .unwrap();
        db.restrict_group(expired_restriction, "slowmode 1", Some(now_ms() - 1_000))
            .await
            .unwrap();

        let groups = db.list_deliverable_groups(session, now_ms()).await.unwrap();
        let ids: Vec<_> = groups.iter().map(|g| g.id).collect();
        assert!(ids.contains(&good));
        assert!(ids.contains(&expired_restriction));
        assert!(!ids.contains(&skipped));
        assert!(!ids.contains(&restricted));
    }

    #[tokio::test]
    async fn test_unskip_reinstates_group() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;
        let group = seed_group(&db, session, -1).await;

        db.skip_group(group, "write forbidden").await.unwrap();
        assert!(db
            .list_deliverable_groups(session, now_ms())
            .await
            .unwrap()
            .is_empty());

        db.unskip_group(group).await.unwrap();

        let groups = db.list_deliverable_groups(session, now_ms()).await.unwrap();
        assert_eq!(groups.len(), 1);
        let reinstated = &groups[0];
        assert!(!reinstated.is_skipped);
        assert!(!reinstated.has_restrictions);
        assert_eq!(reinstated.skip_reason, None);
    }

    #[tokio::test]
    async fn test_soft_deleted_session_leaves_rotation() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;

        db.update_session_status(session, SessionStatus::Deleted)
            .await
            .unwrap();

        assert!(db.list_usable_sessions(tenant).await.unwrap().is_empty());
        // The row survives for history
        let row = db.get_session(session).await.unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Deleted);
    }

    #[tokio::test]
    async fn test_priority_recompute_marks_top_n() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;

        for i in 1..=5i64 {
            let id = seed_group(&db, session, -i).await;
            db.set_group_activity(id, i as f64).await.unwrap();
        }

        db.recompute_priority_groups(session, 2).await.unwrap();

        let groups = db.list_deliverable_groups(session, now_ms()).await.unwrap();
        let priority: Vec<_> = groups
            .iter()
            .filter(|g| g.is_priority)
            .map(|g| (g.platform_id, g.priority_order))
            .collect();

        // Highest activity first
        assert_eq!(priority.len(), 2);
        assert!(priority.contains(&(-5, Some(1))));
        assert!(priority.contains(&(-4, Some(2))));
    }

    #[tokio::test]
    async fn test_post_history_and_failed_group_listing() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session = seed_session(&db, tenant, "s1").await;
        let g1 = seed_group(&db, session, -1).await;
        let g2 = seed_group(&db, session, -2).await;
        let g3 = seed_group(&db, session, -3).await;
        let ad = seed_ad(&db, tenant, "content").await;

        let post_id = db.create_post(ad, session, 3, now_ms()).await.unwrap();

        let now = now_ms();
        db.add_post_history(&PostHistory::sent(&post_id, g1, Some(10), now))
            .await
            .unwrap();
        db.add_post_history(&PostHistory::failed(&post_id, g2, "FLOOD_WAIT 30", now))
            .await
            .unwrap();
        // g3 failed once, then succeeded on retry
        db.add_post_history(&PostHistory::failed(&post_id, g3, "timeout", now))
            .await
            .unwrap();
        db.add_post_history(&PostHistory::sent(&post_id, g3, Some(11), now + 1))
            .await
            .unwrap();

        let failed = db.list_failed_group_ids(&post_id).await.unwrap();
        assert_eq!(failed, vec![g2]);

        let history = db.list_post_history(&post_id).await.unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_subscription_expiry_sweep() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let now = now_ms();

        db.create_subscription(tenant, 5, 500, 10, None, now - 10_000, now - 1_000)
            .await
            .unwrap();
        db.create_subscription(tenant, 5, 500, 10, None, now, now + 100_000)
            .await
            .unwrap();

        let expired = db.expire_subscriptions(now).await.unwrap();
        assert_eq!(expired, 1);

        let active = db.get_active_subscription(tenant).await.unwrap();
        assert!(active.is_some());
        assert!(active.unwrap().ends_at > now);
    }

    #[tokio::test]
    async fn test_payment_expiry_sweep() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let now = now_ms();
        let h48 = 48 * 3600 * 1000;

        db.create_payment(tenant, 1_000, now - h48 - 1).await.unwrap();
        let fresh = db.create_payment(tenant, 2_000, now).await.unwrap();
        let confirmed = db.create_payment(tenant, 3_000, now - h48 - 1).await.unwrap();
        db.confirm_payment(confirmed, now).await.unwrap();

        let expired = db.expire_pending_payments(now - h48).await.unwrap();
        assert_eq!(expired, 1);

        let payment = db.get_payment(fresh).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_statistics_upsert() {
        let db = memory_db().await;

        let row = SystemStatistics {
            date: "2025-06-15".to_string(),
            total_tenants: 3,
            active_sessions: 7,
            total_groups: 120,
            posts_sent: 40,
            posts_failed: 2,
            revenue_cents: 9_900,
        };
        db.upsert_statistics(&row).await.unwrap();

        let mut updated = row.clone();
        updated.posts_sent = 55;
        db.upsert_statistics(&updated).await.unwrap();

        let stored = db.get_statistics("2025-06-15").await.unwrap().unwrap();
        assert_eq!(stored.posts_sent, 55);
        assert_eq!(stored.total_groups, 120);
    }
}
