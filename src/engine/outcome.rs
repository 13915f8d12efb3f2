//! Delivery outcome classification
//!
//! The single place where a send result turns into state: PostHistory rows,
//! group restrictions, session freezes and rate-state updates. Drivers call
//! [`classify_and_apply`] after every send and act on the returned plan; no
//! error here ever aborts a round.

use tracing::{debug, warn};

use crate::client::SentMessage;
use crate::engine::job::{Job, LogEntry, LogKind};
use crate::engine::EngineShared;
use crate::error::{ClientError, Result};
use crate::throttle::FloodAction;
use crate::types::{DeliveryStatus, Group, PostHistory};

/// What the driver must do after the outcome was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomePlan {
    pub status: DeliveryStatus,
    /// Inline wait demanded by a short flood signal, in seconds.
    pub inline_sleep_secs: Option<u64>,
}

impl OutcomePlan {
    fn of(status: DeliveryStatus) -> Self {
        Self {
            status,
            inline_sleep_secs: None,
        }
    }
}

/// Apply one send result to the repository, the rate registry and the job.
pub(crate) async fn classify_and_apply(
    shared: &EngineShared,
    job: &Job,
    group: &Group,
    result: std::result::Result<SentMessage, ClientError>,
    now: i64,
) -> Result<OutcomePlan> {
    let session_id = group.session_id;

    match result {
        Ok(sent) => {
            shared.limiter.on_success(session_id, now);
            shared.db.touch_group_posted(group.id, now).await?;
            shared
                .db
                .add_post_history(&PostHistory::sent(
                    &job.post_id,
                    group.id,
                    sent.message_id,
                    now,
                ))
                .await?;

            job.record_sent();
            job.push_log(LogEntry::delivery(
                LogKind::Sent,
                session_id,
                group.id,
                format!("sent to '{}'", group.title),
            ));
            debug!(group_id = group.id, session_id, "delivered");

            Ok(OutcomePlan::of(DeliveryStatus::Sent))
        }

        Err(ClientError::FloodWait(seconds)) => {
            let action = shared.limiter.on_flood(session_id, now, seconds);
            let reason = format!("FLOOD_WAIT {}", seconds);

            shared
                .db
                .add_post_history(&PostHistory::failed(&job.post_id, group.id, &reason, now))
                .await?;
            job.record_failed();
            job.push_log(LogEntry::delivery(
                LogKind::Failed,
                session_id,
                group.id,
                reason,
            ));
            warn!(session_id, seconds, "flood signal");

            let mut plan = OutcomePlan::of(DeliveryStatus::Failed);
            if let FloodAction::SleepInline { seconds } = action {
                plan.inline_sleep_secs = Some(seconds);
            }
            Ok(plan)
        }

        Err(ClientError::SlowmodeWait(seconds)) => {
            // Per-group throttle; the session is untouched.
            let reason = format!("slowmode {}", seconds);
            shared
                .db
                .restrict_group(group.id, &reason, Some(now + (seconds * 1000) as i64))
                .await?;
            shared
                .db
                .add_post_history(&PostHistory::skipped(&job.post_id, group.id, &reason, now))
                .await?;

            job.record_skipped();
            job.push_log(LogEntry::delivery(
                LogKind::Skipped,
                session_id,
                group.id,
                reason,
            ));

            Ok(OutcomePlan::of(DeliveryStatus::Skipped))
        }

        Err(ClientError::WriteForbidden) => {
            permanent_skip(shared, job, group, "write forbidden", now).await
        }

        Err(ClientError::ChatRestricted) | Err(ClientError::PremiumRequired) => {
            permanent_skip(shared, job, group, "chat restricted", now).await
        }

        Err(ClientError::AuthRevoked) => {
            shared.db.ban_session(session_id, now).await?;
            shared.limiter.freeze_indefinitely(session_id);
            shared.evict_client(session_id).await;

            shared
                .db
                .add_post_history(&PostHistory::failed(
                    &job.post_id,
                    group.id,
                    "session dead",
                    now,
                ))
                .await?;
            job.record_failed();
            job.push_log(LogEntry::delivery(
                LogKind::Failed,
                session_id,
                group.id,
                "session dead",
            ));
            warn!(session_id, "authorization revoked, session banned");

            // The permanent cooldown gates out every further group on this
            // session, here and in all later rounds.
            Ok(OutcomePlan::of(DeliveryStatus::Failed))
        }

        Err(e @ ClientError::Transient(_)) | Err(e @ ClientError::Connect(_)) => {
            let armed = shared.limiter.on_transient_error(session_id, now);
            let reason = e.to_string();

            shared
                .db
                .add_post_history(&PostHistory::failed(&job.post_id, group.id, &reason, now))
                .await?;
            job.record_failed();
            job.push_log(LogEntry::delivery(
                LogKind::Failed,
                session_id,
                group.id,
                reason,
            ));
            if armed {
                warn!(session_id, "error streak, session cooling down");
            }

            Ok(OutcomePlan::of(DeliveryStatus::Failed))
        }
    }
}

async fn permanent_skip(
    shared: &EngineShared,
    job: &Job,
    group: &Group,
    reason: &str,
    now: i64,
) -> Result<OutcomePlan> {
    shared.db.skip_group(group.id, reason).await?;
    shared
        .db
        .add_post_history(&PostHistory::skipped(&job.post_id, group.id, reason, now))
        .await?;

    job.record_skipped();
    job.push_log(LogEntry::delivery(
        LogKind::Skipped,
        group.session_id,
        group.id,
        reason,
    ));

    Ok(OutcomePlan::of(DeliveryStatus::Skipped))
}
