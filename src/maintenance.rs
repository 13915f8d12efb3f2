//! Maintenance loops
//!
//! Fire-and-log housekeeping on independent timers: subscription expiry,
//! payment expiry, frozen-session thaw, the daily statistics rollup and the
//! priority-group recompute. Each loop swallows and logs its own failures;
//! none can block another.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{now_ms, CronSpec};
use crate::db::Database;
use crate::error::Result;
use crate::types::SystemStatistics;

const PAYMENT_TTL_MS: i64 = 48 * 3600 * 1000;
const FREEZE_TTL_MS: i64 = 7 * 24 * 3600 * 1000;

pub struct MaintenanceLoops {
    db: Database,
    priority_top_n: u32,
}

impl MaintenanceLoops {
    pub fn new(db: Database, priority_top_n: u32) -> Self {
        Self { db, priority_top_n }
    }

    /// Spawn every loop on its own timer.
    pub fn spawn_all(self) -> Vec<JoinHandle<()>> {
        let this = Arc::new(self);

        let subscriptions = {
            let this = Arc::clone(&this);
            CronSpec::EveryHour.spawn("subscription_expiry", move || {
                let this = Arc::clone(&this);
                async move { this.expire_subscriptions().await }
            })
        };

        let payments = {
            let this = Arc::clone(&this);
            CronSpec::EveryHours(6).spawn("payment_expiry", move || {
                let this = Arc::clone(&this);
                async move { this.expire_payments().await }
            })
        };

        let thaw = {
            let this = Arc::clone(&this);
            CronSpec::DailyAt { hour: 3, minute: 0 }.spawn("session_thaw", move || {
                let this = Arc::clone(&this);
                async move { this.thaw_frozen_sessions().await }
            })
        };

        let stats = {
            let this = Arc::clone(&this);
            CronSpec::DailyAt { hour: 0, minute: 0 }.spawn("statistics_rollup", move || {
                let this = Arc::clone(&this);
                async move { this.rollup_daily_statistics().await }
            })
        };

        let priority = {
            let this = Arc::clone(&this);
            CronSpec::DailyAt { hour: 4, minute: 0 }.spawn("priority_recompute", move || {
                let this = Arc::clone(&this);
                async move { this.recompute_priority_groups().await }
            })
        };

        vec![subscriptions, payments, thaw, stats, priority]
    }

    /// Active subscriptions past their end date become Expired.
    pub async fn expire_subscriptions(&self) -> Result<()> {
        let expired = self.db.expire_subscriptions(now_ms()).await?;
        if expired > 0 {
            info!(expired, "subscriptions expired");
        }
        Ok(())
    }

    /// Pending payments older than 48 hours become Expired.
    pub async fn expire_payments(&self) -> Result<()> {
        let expired = self
            .db
            .expire_pending_payments(now_ms() - PAYMENT_TTL_MS)
            .await?;
        if expired > 0 {
            info!(expired, "pending payments expired");
        }
        Ok(())
    }

    /// Sessions frozen for 7 days get their freeze cleared. Banned sessions
    /// are excluded: their credential is dead and must not re-enter rotation.
    pub async fn thaw_frozen_sessions(&self) -> Result<()> {
        let thawed = self
            .db
            .thaw_sessions_frozen_before(now_ms() - FREEZE_TTL_MS)
            .await?;
        if thawed > 0 {
            info!(thawed, "frozen sessions thawed");
        }
        Ok(())
    }

    /// Upsert yesterday's SystemStatistics row.
    pub async fn rollup_daily_statistics(&self) -> Result<()> {
        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now)
            - ChronoDuration::days(1);
        let day_end = day_start + ChronoDuration::days(1);

        self.rollup_statistics_for(
            &day_start.format("%Y-%m-%d").to_string(),
            day_start.timestamp_millis(),
            day_end.timestamp_millis(),
        )
        .await
    }

    /// Rollup for an explicit window, used by the daily loop and by tests.
    pub async fn rollup_statistics_for(&self, date: &str, start: i64, end: i64) -> Result<()> {
        let (posts_sent, posts_failed) = self.db.count_deliveries_between(start, end).await?;
        let revenue_cents = self.db.sum_confirmed_revenue_between(start, end).await?;

        let row = SystemStatistics {
            date: date.to_string(),
            total_tenants: self.db.count_tenants().await?,
            active_sessions: self.db.count_active_sessions().await?,
            total_groups: self.db.count_all_groups().await?,
            posts_sent,
            posts_failed,
            revenue_cents,
        };
        self.db.upsert_statistics(&row).await?;

        info!(date, posts_sent, posts_failed, "statistics rolled up");
        Ok(())
    }

    /// Re-rank every active session's groups into the priority set.
    pub async fn recompute_priority_groups(&self) -> Result<()> {
        let mut sessions = Vec::new();
        for tenant_id in self.list_tenant_ids().await? {
            sessions.extend(self.db.list_usable_sessions(tenant_id).await?);
        }

        for session in &sessions {
            self.db
                .recompute_priority_groups(session.id, self.priority_top_n)
                .await?;
        }

        info!(sessions = sessions.len(), "priority groups recomputed");
        Ok(())
    }

    async fn list_tenant_ids(&self) -> Result<Vec<i64>> {
        use crate::error::DbError;

        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM tenants ORDER BY id")
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
