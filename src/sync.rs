//! Group synchronisation
//!
//! Populates and refreshes the deliverable-group set for a session from the
//! platform's own view. Sync never touches engine-owned flags: a group that
//! was skipped for "write forbidden" stays skipped across syncs until it is
//! reinstated explicitly.

use tracing::info;

use crate::client::SessionClient;
use crate::clock::now_ms;
use crate::db::Database;
use crate::error::Result;
use crate::types::Session;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Groups reported by the platform.
    pub discovered: usize,
    /// Rows in the repository after the sync.
    pub total_groups: i64,
    /// Rows still marked active after the sync.
    pub active_groups: i64,
}

/// Pull the session's joined groups and reconcile the repository: upsert
/// what the platform reports, deactivate what vanished, refresh the
/// session's denormalised counters.
pub async fn sync_session_groups(
    db: &Database,
    client: &dyn SessionClient,
    session: &Session,
) -> Result<SyncReport> {
    let snapshots = client.sync_groups().await?;
    let now = now_ms();

    db.batch_add_groups(session.id, &snapshots, now).await?;

    let present: Vec<i64> = snapshots.iter().map(|s| s.platform_id).collect();
    db.deactivate_missing_groups(session.id, &present).await?;

    let total_groups = db.count_groups(session.id).await?;
    let active_groups = db.count_active_groups(session.id).await?;
    db.update_session_sync_stats(session.id, total_groups, active_groups, now)
        .await?;

    info!(
        session_id = session.id,
        discovered = snapshots.len(),
        total_groups,
        active_groups,
        "group sync complete"
    );

    Ok(SyncReport {
        discovered: snapshots.len(),
        total_groups,
        active_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::GroupSnapshot;
    use crate::db::test_support::{memory_db, seed_session, seed_tenant};
    use crate::types::GroupKind;

    fn snapshot(platform_id: i64, title: &str) -> GroupSnapshot {
        GroupSnapshot {
            platform_id,
            title: title.to_string(),
            kind: GroupKind::Group,
            member_count: 50,
            username: None,
        }
    }

    #[tokio::test]
    async fn test_sync_inserts_and_counts() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session_id = seed_session(&db, tenant, "s1").await;
        let session = db.get_session(session_id).await.unwrap().unwrap();

        let client = MockClient::new(session_id)
            .with_groups(vec![snapshot(-1, "a"), snapshot(-2, "b"), snapshot(-3, "c")]);
        client.connect().await.unwrap();

        let report = sync_session_groups(&db, &client, &session).await.unwrap();
        assert_eq!(report.discovered, 3);
        assert_eq!(report.total_groups, 3);
        assert_eq!(report.active_groups, 3);

        let refreshed = db.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(refreshed.total_groups, 3);
        assert!(refreshed.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_sync_deactivates_vanished_groups() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session_id = seed_session(&db, tenant, "s1").await;
        let session = db.get_session(session_id).await.unwrap().unwrap();

        let client =
            MockClient::new(session_id).with_groups(vec![snapshot(-1, "a"), snapshot(-2, "b")]);
        client.connect().await.unwrap();
        sync_session_groups(&db, &client, &session).await.unwrap();

        // Second sync only sees one group
        let client = MockClient::new(session_id).with_groups(vec![snapshot(-1, "a")]);
        client.connect().await.unwrap();
        let report = sync_session_groups(&db, &client, &session).await.unwrap();

        assert_eq!(report.total_groups, 2);
        assert_eq!(report.active_groups, 1);

        let gone = db.find_group(session_id, -2).await.unwrap().unwrap();
        assert!(!gone.is_active);
    }

    #[tokio::test]
    async fn test_sync_preserves_engine_flags() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session_id = seed_session(&db, tenant, "s1").await;
        let session = db.get_session(session_id).await.unwrap().unwrap();

        let client = MockClient::new(session_id).with_groups(vec![snapshot(-1, "a")]);
        client.connect().await.unwrap();
        sync_session_groups(&db, &client, &session).await.unwrap();

        let group = db.find_group(session_id, -1).await.unwrap().unwrap();
        db.skip_group(group.id, "write forbidden").await.unwrap();

        sync_session_groups(&db, &client, &session).await.unwrap();

        let after = db.find_group(session_id, -1).await.unwrap().unwrap();
        assert!(after.is_skipped);
        assert_eq!(after.skip_reason.as_deref(), Some("write forbidden"));
    }

    #[tokio::test]
    async fn test_sync_twice_is_idempotent() {
        let db = memory_db().await;
        let tenant = seed_tenant(&db, "acme").await;
        let session_id = seed_session(&db, tenant, "s1").await;
        let session = db.get_session(session_id).await.unwrap().unwrap();

        let client =
            MockClient::new(session_id).with_groups(vec![snapshot(-1, "a"), snapshot(-2, "b")]);
        client.connect().await.unwrap();

        let first = sync_session_groups(&db, &client, &session).await.unwrap();
        let second = sync_session_groups(&db, &client, &session).await.unwrap();
        assert_eq!(first.total_groups, second.total_groups);
        assert_eq!(second.total_groups, 2);
    }
}
