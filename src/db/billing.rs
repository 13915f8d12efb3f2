//! Tenant, subscription, payment and statistics queries
//!
//! Read and written by the maintenance loops; the posting engine itself only
//! reads the subscription pacing hint.

use crate::clock::now_ms;
use crate::error::{DbError, Result};
use crate::types::{
    Payment, PaymentStatus, Subscription, SystemStatistics, Tenant, TenantId,
};

use super::Database;

impl Database {
    pub async fn create_tenant(
        &self,
        name: &str,
        brand_ad_enabled: bool,
        brand_ad_text: Option<&str>,
    ) -> Result<TenantId> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenants (name, brand_ad_enabled, brand_ad_text, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(brand_ad_enabled)
        .bind(brand_ad_text)
        .bind(now_ms())
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT * FROM tenants WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(tenant)
    }

    pub async fn count_tenants(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tenants")
            .fetch_one(self.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_subscription(
        &self,
        tenant_id: TenantId,
        max_sessions: i64,
        max_groups: i64,
        max_ads: i64,
        group_interval: Option<i64>,
        starts_at: i64,
        ends_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (tenant_id, max_sessions, max_groups, max_ads, group_interval,
                 status, starts_at, ends_at)
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(tenant_id)
        .bind(max_sessions)
        .bind(max_groups)
        .bind(max_ads)
        .bind(group_interval)
        .bind(starts_at)
        .bind(ends_at)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_active_subscription(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE tenant_id = ? AND status = 'active'
            ORDER BY ends_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(subscription)
    }

    /// Flip every Active subscription whose end date has passed to Expired.
    pub async fn expire_subscriptions(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET status = 'expired'
            WHERE status = 'active' AND ends_at <= ?
            "#,
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn create_payment(
        &self,
        tenant_id: TenantId,
        amount_cents: i64,
        created_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (tenant_id, amount_cents, status, created_at)
            VALUES (?, ?, 'pending', ?)
            "#,
        )
        .bind(tenant_id)
        .bind(amount_cents)
        .bind(created_at)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_payment(&self, id: i64) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(payment)
    }

    pub async fn confirm_payment(&self, id: i64, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments SET status = 'confirmed', confirmed_at = ? WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Expire pending payments created at or before `cutoff`.
    pub async fn expire_pending_payments(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'expired'
            WHERE status = 'pending' AND created_at <= ?
            "#,
        )
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Revenue confirmed within `[start, end)`.
    pub async fn sum_confirmed_revenue_between(&self, start: i64, end: i64) -> Result<i64> {
        let (sum,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0) FROM payments
            WHERE status = 'confirmed'
              AND confirmed_at IS NOT NULL
              AND confirmed_at >= ? AND confirmed_at < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(sum)
    }

    pub async fn upsert_statistics(&self, row: &SystemStatistics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_statistics
                (date, total_tenants, active_sessions, total_groups,
                 posts_sent, posts_failed, revenue_cents)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                total_tenants = excluded.total_tenants,
                active_sessions = excluded.active_sessions,
                total_groups = excluded.total_groups,
                posts_sent = excluded.posts_sent,
                posts_failed = excluded.posts_failed,
                revenue_cents = excluded.revenue_cents
            "#,
        )
        .bind(&row.date)
        .bind(row.total_tenants)
        .bind(row.active_sessions)
        .bind(row.total_groups)
        .bind(row.posts_sent)
        .bind(row.posts_failed)
        .bind(row.revenue_cents)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_statistics(&self, date: &str) -> Result<Option<SystemStatistics>> {
        let row = sqlx::query_as::<_, SystemStatistics>(
            r#"
            SELECT * FROM system_statistics WHERE date = ?
            "#,
        )
        .bind(date)
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row)
    }

    pub async fn list_payments_with_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments WHERE status = ? ORDER BY created_at
            "#,
        )
        .bind(status)
        .fetch_all(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(payments)
    }
}
