//! Group queries
//!
//! Groups are created by sync and mutated by the engine on delivery
//! outcomes; nothing else writes these rows.

use crate::client::GroupSnapshot;
use crate::error::{DbError, Result};
use crate::types::{Group, GroupId, SessionId};

use super::Database;

impl Database {
    /// Bulk-upsert synced groups. New `(session_id, platform_id)` pairs are
    /// inserted; existing rows get their platform metadata refreshed and are
    /// reactivated. Engine-owned flags (skip, restrictions, priority,
    /// last_post_at) are preserved. Idempotent in `platform_id`.
    pub async fn batch_add_groups(
        &self,
        session_id: SessionId,
        snapshots: &[GroupSnapshot],
        now: i64,
    ) -> Result<u64> {
        let mut affected = 0;
        for snapshot in snapshots {
            let result = sqlx::query(
                r#"
                INSERT INTO groups
                    (session_id, platform_id, title, kind, username, member_count, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(session_id, platform_id)
                DO UPDATE SET
                    title = excluded.title,
                    kind = excluded.kind,
                    username = excluded.username,
                    member_count = excluded.member_count,
                    is_active = 1
                "#,
            )
            .bind(session_id)
            .bind(snapshot.platform_id)
            .bind(&snapshot.title)
            .bind(snapshot.kind)
            .bind(&snapshot.username)
            .bind(snapshot.member_count)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(DbError::SqlxError)?;

            affected += result.rows_affected();
        }
        Ok(affected)
    }

    /// Deactivate groups the platform no longer reports for this session.
    pub async fn deactivate_missing_groups(
        &self,
        session_id: SessionId,
        present_platform_ids: &[i64],
    ) -> Result<u64> {
        if present_platform_ids.is_empty() {
            let result = sqlx::query(
                r#"
                UPDATE groups SET is_active = 0 WHERE session_id = ?
                "#,
            )
            .bind(session_id)
            .execute(self.pool())
            .await
            .map_err(DbError::SqlxError)?;
            return Ok(result.rows_affected());
        }

        let placeholders = vec!["?"; present_platform_ids.len()].join(", ");
        let sql = format!(
            "UPDATE groups SET is_active = 0 \
             WHERE session_id = ? AND platform_id NOT IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(session_id);
        for id in present_platform_ids {
            query = query.bind(*id);
        }

        let result = query
            .execute(self.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT * FROM groups WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(group)
    }

    pub async fn find_group(
        &self,
        session_id: SessionId,
        platform_id: i64,
    ) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT * FROM groups WHERE session_id = ? AND platform_id = ?
            "#,
        )
        .bind(session_id)
        .bind(platform_id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(group)
    }

    /// Groups a driver may target: active, not skipped, with no live
    /// restriction.
    pub async fn list_deliverable_groups(
        &self,
        session_id: SessionId,
        now: i64,
    ) -> Result<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT * FROM groups
            WHERE session_id = ?
              AND is_active = 1
              AND is_skipped = 0
              AND (has_restrictions = 0
                   OR (restriction_until IS NOT NULL AND restriction_until < ?))
            ORDER BY id
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(groups)
    }

    /// Stamp a successful delivery.
    pub async fn touch_group_posted(&self, id: GroupId, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups
            SET last_post_at = ?, activity_score = activity_score + 1
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Apply a temporary per-group restriction (slow mode).
    pub async fn restrict_group(
        &self,
        id: GroupId,
        reason: &str,
        until: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups
            SET has_restrictions = 1, restriction_until = ?, skip_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(until)
        .bind(reason)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Take the group out of rotation until someone reinstates it.
    pub async fn skip_group(&self, id: GroupId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups
            SET is_skipped = 1, has_restrictions = 1, skip_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Manual reinstate of a skipped or restricted group.
    pub async fn unskip_group(&self, id: GroupId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups
            SET is_skipped = 0, has_restrictions = 0,
                restriction_until = NULL, skip_reason = NULL
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_group_activity(&self, id: GroupId, score: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups SET activity_score = ? WHERE id = ?
            "#,
        )
        .bind(score)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Re-rank the session's groups: the top `n` by activity score then
    /// member count are marked priority with order 1..=n, the rest demoted.
    pub async fn recompute_priority_groups(&self, session_id: SessionId, n: u32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups SET is_priority = 0, priority_order = NULL WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let ranked: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM groups
            WHERE session_id = ? AND is_active = 1
            ORDER BY activity_score DESC, member_count DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(n)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        for (order, (id,)) in ranked.iter().enumerate() {
            sqlx::query(
                r#"
                UPDATE groups SET is_priority = 1, priority_order = ? WHERE id = ?
                "#,
            )
            .bind(order as i64 + 1)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(DbError::SqlxError)?;
        }

        Ok(())
    }

    pub async fn count_groups(&self, session_id: SessionId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM groups WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(self.pool())
                .await
                .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    pub async fn count_active_groups(&self, session_id: SessionId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM groups WHERE session_id = ? AND is_active = 1",
        )
        .bind(session_id)
        .fetch_one(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    pub async fn count_all_groups(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM groups")
            .fetch_one(self.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(count)
    }
}
