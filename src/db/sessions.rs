//! Session queries

use crate::clock::now_ms;
use crate::error::{DbError, Result};
use crate::types::{Session, SessionId, SessionStatus, TenantId};

use super::Database;

impl Database {
    /// Register a new session. It starts Inactive until the credential is
    /// obtained.
    pub async fn create_session(
        &self,
        tenant_id: TenantId,
        name: &str,
        phone: &str,
    ) -> Result<SessionId> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (tenant_id, name, phone, status, created_at)
            VALUES (?, ?, ?, 'inactive', ?)
            "#,
        )
        .bind(tenant_id)
        .bind(name)
        .bind(phone)
        .bind(now_ms())
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Store the obtained credential and flip the session to Active.
    pub async fn activate_session(&self, id: SessionId, session_string: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET session_string = ?, status = 'active' WHERE id = ?
            "#,
        )
        .bind(session_string)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(session)
    }

    pub async fn update_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET status = ? WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Sessions a job may draw on: Active, unfrozen, with a credential.
    pub async fn list_usable_sessions(&self, tenant_id: TenantId) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE tenant_id = ?
              AND status = 'active'
              AND is_frozen = 0
              AND session_string IS NOT NULL
              AND session_string != ''
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(sessions)
    }

    /// Reversible disablement under rate-limit pressure.
    pub async fn freeze_session(&self, id: SessionId, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET is_frozen = 1,
                frozen_at = ?,
                freeze_count = freeze_count + 1,
                status = CASE status WHEN 'banned' THEN 'banned' ELSE 'frozen' END
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

    /// Terminal disablement: the platform revoked the credential.
    pub async fn ban_session(&self, id: SessionId, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'banned',
                is_frozen = 1,
                frozen_at = ?,
                freeze_count = freeze_count + 1
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

    /// Thaw sessions frozen at or before `cutoff`. Banned sessions are left
    /// alone; their credential is gone and a thaw would resurrect a dead
    /// account.
    pub async fn thaw_sessions_frozen_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_frozen = 0,
                frozen_at = NULL,
                unfreeze_at = ?,
                status = CASE status WHEN 'frozen' THEN 'active' ELSE status END
            WHERE is_frozen = 1
              AND status != 'banned'
              AND frozen_at IS NOT NULL
              AND frozen_at <= ?
            "#,
        )
        .bind(now_ms())
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Refresh the denormalised group counters after a sync.
    pub async fn update_session_sync_stats(
        &self,
        id: SessionId,
        total_groups: i64,
        active_groups: i64,
        synced_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET total_groups = ?, active_groups = ?, last_sync_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_groups)
        .bind(active_groups)
        .bind(synced_at)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn count_active_sessions(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sessions WHERE status = 'active' AND is_frozen = 0
            "#,
        )
        .fetch_one(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count)
    }
}
