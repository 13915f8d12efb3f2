//! Post and post-history queries

use crate::error::{DbError, Result};
use crate::types::{AdId, GroupId, Post, PostHistory, PostStatus, SessionId};

use super::Database;

impl Database {
    /// Persist the envelope for a new broadcast run.
    pub async fn create_post(
        &self,
        ad_id: AdId,
        session_id: SessionId,
        total_groups: i64,
        now: i64,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO posts (id, ad_id, session_id, status, total_groups, created_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(ad_id)
        .bind(session_id)
        .bind(total_groups)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(id)
    }

    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(post)
    }

    pub async fn start_post(&self, id: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts SET status = 'in_progress', started_at = ? WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Refresh the denormalised delivery counters.
    pub async fn update_post_counts(
        &self,
        id: &str,
        completed: i64,
        failed: i64,
        skipped: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET completed_groups = ?, failed_groups = ?, skipped_groups = ?
            WHERE id = ?
            "#,
        )
        .bind(completed)
        .bind(failed)
        .bind(skipped)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn finish_post(&self, id: &str, status: PostStatus, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts SET status = ?, finished_at = ? WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record one delivery attempt.
    pub async fn add_post_history(&self, entry: &PostHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO post_history
                (post_id, group_id, status, message_id, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.post_id)
        .bind(entry.group_id)
        .bind(entry.status)
        .bind(entry.message_id)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_post_history(&self, post_id: &str) -> Result<Vec<PostHistory>> {
        let rows = sqlx::query_as::<_, PostHistory>(
            r#"
            SELECT * FROM post_history WHERE post_id = ? ORDER BY id
            "#,
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows)
    }

    /// Groups whose delivery failed and never succeeded afterwards. Input
    /// for retry-failed runs.
    pub async fn list_failed_group_ids(&self, post_id: &str) -> Result<Vec<GroupId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT group_id FROM post_history
            WHERE post_id = ? AND status = 'failed'
              AND group_id NOT IN (
                  SELECT group_id FROM post_history
                  WHERE post_id = ? AND status = 'sent'
              )
            ORDER BY group_id
            "#,
        )
        .bind(post_id)
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Delivery counts across all posts finished within `[start, end)`.
    pub async fn count_deliveries_between(&self, start: i64, end: i64) -> Result<(i64, i64)> {
        let (sent, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM post_history
            WHERE created_at >= ? AND created_at < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok((sent, failed))
    }
}
