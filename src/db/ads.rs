//! Ad queries

use crate::clock::now_ms;
use crate::error::{DbError, Result};
use crate::types::{Ad, AdId, AdStatus, TenantId};

use super::Database;

impl Database {
    pub async fn create_ad(&self, tenant_id: TenantId, title: &str, content: &str) -> Result<AdId> {
        let result = sqlx::query(
            r#"
            INSERT INTO ads (tenant_id, title, content, status, created_at)
            VALUES (?, ?, ?, 'draft', ?)
            "#,
        )
        .bind(tenant_id)
        .bind(title)
        .bind(content)
        .bind(now_ms())
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_ad(&self, id: AdId) -> Result<Option<Ad>> {
        let ad = sqlx::query_as::<_, Ad>(
            r#"
            SELECT * FROM ads WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(ad)
    }

    pub async fn update_ad_status(&self, id: AdId, status: AdStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads SET status = ? WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_ad_pacing(
        &self,
        id: AdId,
        interval_min: Option<i64>,
        interval_max: Option<i64>,
        group_interval: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads SET interval_min = ?, interval_max = ?, group_interval = ? WHERE id = ?
            "#,
        )
        .bind(interval_min)
        .bind(interval_max)
        .bind(group_interval)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_ad_selected_groups(&self, id: AdId, group_ids: &[i64]) -> Result<()> {
        let json = serde_json::to_string(group_ids)
            .map_err(|e| crate::error::GroupcastError::InvalidInput(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE ads SET selected_groups = ? WHERE id = ?
            "#,
        )
        .bind(json)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_ad_priority_opt_in(&self, id: AdId, use_priority_groups: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads SET use_priority_groups = ? WHERE id = ?
            "#,
        )
        .bind(use_priority_groups)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Queue the ad for the scheduled publisher.
    pub async fn set_ad_schedule(&self, id: AdId, scheduled_for: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads SET is_scheduled = 1, scheduled_for = ? WHERE id = ?
            "#,
        )
        .bind(scheduled_for)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Ads the publisher should fire now: scheduled, due, and in a
    /// publishable status.
    pub async fn list_due_scheduled_ads(&self, now: i64) -> Result<Vec<Ad>> {
        let ads = sqlx::query_as::<_, Ad>(
            r#"
            SELECT * FROM ads
            WHERE is_scheduled = 1
              AND scheduled_for IS NOT NULL
              AND scheduled_for <= ?
              AND status IN ('active', 'paused')
            ORDER BY scheduled_for
            "#,
        )
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(ads)
    }

    /// Publisher fired the ad successfully: activate it and clear the
    /// schedule so the next tick does not fire it again.
    pub async fn mark_ad_published(&self, id: AdId, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads
            SET status = 'active', is_scheduled = 0,
                last_scheduled_at = ?, last_error = NULL
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

    /// Publisher could not fire the ad: park it with the error.
    pub async fn mark_ad_schedule_failed(&self, id: AdId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ads
            SET status = 'paused', is_scheduled = 0, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}
