//! Core domain types for Groupcast
//!
//! All timestamps are unix milliseconds (UTC). Status enums are stored as
//! snake_case TEXT in the database.

use serde::{Deserialize, Serialize};

pub type TenantId = i64;
pub type SessionId = i64;
pub type GroupId = i64;
pub type AdId = i64;

/// The engine's customer. Owns sessions, groups (transitively) and ads.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// When set, `brand_ad_text` is appended to every outgoing ad.
    pub brand_ad_enabled: bool,
    pub brand_ad_text: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
    Frozen,
    Banned,
    Deleted,
}

/// An authenticated, impersonated connection to the messaging platform on
/// behalf of one end-user account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub name: String,
    pub phone: String,
    /// Opaque platform credential. Empty/absent means the account has not
    /// completed authentication yet.
    pub session_string: Option<String>,
    pub status: SessionStatus,
    pub is_frozen: bool,
    pub frozen_at: Option<i64>,
    pub unfreeze_at: Option<i64>,
    pub freeze_count: i64,
    pub last_sync_at: Option<i64>,
    pub total_groups: i64,
    pub active_groups: i64,
    pub created_at: i64,
}

impl Session {
    /// A session may be handed to a driver iff it is Active, not frozen and
    /// carries a credential. Connectivity is checked separately.
    pub fn is_usable(&self) -> bool {
        self.status == SessionStatus::Active
            && !self.is_frozen
            && self
                .session_string
                .as_deref()
                .map(|s| !s.is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Group,
    Supergroup,
    Channel,
}

/// A chat the owning session has joined.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: GroupId,
    pub session_id: SessionId,
    /// Platform-native chat identifier, unique per session.
    pub platform_id: i64,
    pub title: String,
    pub kind: GroupKind,
    pub username: Option<String>,
    pub member_count: i64,
    pub is_active: bool,
    pub is_skipped: bool,
    pub skip_reason: Option<String>,
    pub has_restrictions: bool,
    pub restriction_until: Option<i64>,
    pub is_priority: bool,
    pub priority_order: Option<i64>,
    pub activity_score: f64,
    pub last_post_at: Option<i64>,
    pub created_at: i64,
}

impl Group {
    /// Deliverability per the group's own flags. The owning session's
    /// usability is the caller's concern.
    pub fn is_deliverable(&self, now: i64) -> bool {
        self.is_active
            && !self.is_skipped
            && (!self.has_restrictions || self.restriction_until.map(|t| t < now).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdStatus {
    Draft,
    Active,
    Paused,
    Closed,
    SoldOut,
    Archived,
}

/// A textual advertisement owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ad {
    pub id: AdId,
    pub tenant_id: TenantId,
    pub title: String,
    pub content: String,
    /// JSON array of opaque media references, when the ad carries media.
    pub media_refs: Option<String>,
    pub status: AdStatus,
    pub is_scheduled: bool,
    pub scheduled_for: Option<i64>,
    pub last_scheduled_at: Option<i64>,
    pub last_error: Option<String>,
    /// Anti-spam overrides (ms). Absent fields fall back to config.
    pub interval_min: Option<i64>,
    pub interval_max: Option<i64>,
    pub group_interval: Option<i64>,
    /// JSON array of group ids. When present and non-empty, delivery is
    /// restricted to this set.
    pub selected_groups: Option<String>,
    pub use_priority_groups: bool,
    pub created_at: i64,
}

impl Ad {
    /// Parse the `selected_groups` JSON column. Malformed or empty values
    /// mean "no restriction".
    pub fn selected_group_ids(&self) -> Option<Vec<GroupId>> {
        let raw = self.selected_groups.as_deref()?;
        match serde_json::from_str::<Vec<GroupId>>(raw) {
            Ok(ids) if !ids.is_empty() => Some(ids),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Persisted envelope of a broadcast run, distinct from the in-memory job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub ad_id: AdId,
    /// Primary session, for display. Delivery spans all usable sessions.
    pub session_id: SessionId,
    pub status: PostStatus,
    pub total_groups: i64,
    pub completed_groups: i64,
    pub failed_groups: i64,
    pub skipped_groups: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
    Retrying,
}

/// One delivery attempt for one (post, group) pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostHistory {
    pub id: Option<i64>,
    pub post_id: String,
    pub group_id: GroupId,
    pub status: DeliveryStatus,
    /// Platform message id when the send succeeded.
    pub message_id: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl PostHistory {
    pub fn sent(post_id: &str, group_id: GroupId, message_id: Option<i64>, now: i64) -> Self {
        Self {
            id: None,
            post_id: post_id.to_string(),
            group_id,
            status: DeliveryStatus::Sent,
            message_id,
            error_message: None,
            created_at: now,
        }
    }

    pub fn failed(post_id: &str, group_id: GroupId, error: impl Into<String>, now: i64) -> Self {
        Self {
            id: None,
            post_id: post_id.to_string(),
            group_id,
            status: DeliveryStatus::Failed,
            message_id: None,
            error_message: Some(error.into()),
            created_at: now,
        }
    }

    pub fn skipped(post_id: &str, group_id: GroupId, reason: impl Into<String>, now: i64) -> Self {
        Self {
            id: None,
            post_id: post_id.to_string(),
            group_id,
            status: DeliveryStatus::Skipped,
            message_id: None,
            error_message: Some(reason.into()),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Expired,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub tenant_id: TenantId,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

/// Plan caps for a tenant. `group_interval` is a per-group pacing hint (ms)
/// applied when the ad carries none of its own.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub tenant_id: TenantId,
    pub max_sessions: i64,
    pub max_groups: i64,
    pub max_ads: i64,
    pub group_interval: Option<i64>,
    pub status: SubscriptionStatus,
    pub starts_at: i64,
    pub ends_at: i64,
}

/// Daily rollup row, keyed by calendar date ("YYYY-MM-DD", UTC).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemStatistics {
    pub date: String,
    pub total_tenants: i64,
    pub active_sessions: i64,
    pub total_groups: i64,
    pub posts_sent: i64,
    pub posts_failed: i64,
    pub revenue_cents: i64,
}
