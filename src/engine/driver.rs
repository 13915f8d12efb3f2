//! Per-session delivery driver
//!
//! One driver runs per participating session per round. Drivers of the same
//! job race each other freely; within a driver sends are strictly serial and
//! spaced by the configured delays, because the platform enforces its limits
//! per account.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::client::SessionClient;
use crate::clock::{now_ms, sleep_unless};
use crate::engine::events::Event;
use crate::engine::job::{Job, LogEntry, LogKind};
use crate::engine::outcome::classify_and_apply;
use crate::engine::EngineShared;
use crate::error::ClientError;
use crate::types::{DeliveryStatus, Group, PostHistory};

/// Deliver the job's content to `groups`, in order. Returns the number of
/// successful sends.
pub(crate) async fn run_driver(
    shared: Arc<EngineShared>,
    job: Arc<Job>,
    client: Arc<dyn SessionClient>,
    groups: Vec<Group>,
) -> u64 {
    let mut sent_in_round: u64 = 0;
    let total = groups.len();
    let stop_poll = Duration::from_millis(shared.config.engine.stop_poll_ms);

    for (index, group) in groups.iter().enumerate() {
        if job.stop_requested() {
            break;
        }

        // Paused jobs hold their position and spin until resumed or stopped.
        while job.pause_requested() && !job.stop_requested() {
            tokio::time::sleep(stop_poll).await;
        }
        if job.stop_requested() {
            break;
        }

        let now = now_ms();

        // Group cooldown gate
        if let Some(last) = group.last_post_at {
            if now - last < job.group_cooldown_ms as i64 {
                record_skip(&shared, &job, group, "group cooldown", now).await;
                continue;
            }
        }

        // Session cooldown gate
        if shared
            .limiter
            .cooldown_remaining(group.session_id, now)
            .is_some()
        {
            record_skip(&shared, &job, group, "session cooldown", now).await;
            continue;
        }

        let send_timeout = Duration::from_millis(shared.config.client.send_timeout_ms);
        let result = match tokio::time::timeout(
            send_timeout,
            client.send_message(group.platform_id, &job.content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transient("send timeout".to_string())),
        };

        match classify_and_apply(&shared, &job, group, result, now).await {
            Ok(plan) => {
                if plan.status == DeliveryStatus::Sent {
                    sent_in_round += 1;
                    shared.events.emit(Event::GroupDelivered {
                        job_id: job.id.clone(),
                        session_id: group.session_id,
                        group_id: group.id,
                    });
                }

                // A short flood wait delays only this driver.
                if let Some(seconds) = plan.inline_sleep_secs {
                    sleep_unless(Duration::from_secs(seconds), stop_poll, || {
                        job.stop_requested()
                    })
                    .await;
                }
            }
            Err(e) => {
                // Bookkeeping failed; the round continues regardless.
                warn!(group_id = group.id, error = %e, "failed to record delivery outcome");
            }
        }

        if index + 1 < total && !job.stop_requested() {
            let delay = draw_delay(&shared, &job, sent_in_round);
            sleep_unless(delay, stop_poll, || job.stop_requested()).await;
        }
    }

    sent_in_round
}

/// Inter-group spacing: a long pause on every `long_pause_interval`-th
/// successful send, the regular jittered delay otherwise.
fn draw_delay(shared: &EngineShared, job: &Job, sent_so_far: u64) -> Duration {
    let engine = &shared.config.engine;
    let interval = u64::from(engine.long_pause_interval);

    let (min, max) = if interval > 0 && sent_so_far >= interval && sent_so_far % interval == 0 {
        (engine.long_pause_min_ms, engine.long_pause_max_ms)
    } else {
        (job.min_group_delay_ms, job.max_group_delay_ms)
    };

    let millis = if min >= max {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    Duration::from_millis(millis)
}

async fn record_skip(shared: &EngineShared, job: &Job, group: &Group, reason: &str, now: i64) {
    if let Err(e) = shared
        .db
        .add_post_history(&PostHistory::skipped(&job.post_id, group.id, reason, now))
        .await
    {
        warn!(group_id = group.id, error = %e, "failed to record skip");
    }
    job.record_skipped();
    job.push_log(LogEntry::delivery(
        LogKind::Skipped,
        group.session_id,
        group.id,
        reason,
    ));
}
