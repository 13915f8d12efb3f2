//! Round loop
//!
//! A job runs round after round until it is stopped (or, for bounded runs
//! like retry-failed, until `max_rounds` completes). Each round re-resolves
//! the deliverable group set, shuffles it, fans out one driver per session
//! and waits for all of them before pausing.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::client::SessionClient;
use crate::clock::{now_ms, sleep_unless};
use crate::engine::driver::run_driver;
use crate::engine::events::Event;
use crate::engine::job::{Job, JobStatus, LogEntry, LogKind};
use crate::engine::EngineShared;
use crate::error::Result;
use crate::types::{Group, PostStatus, SessionId};

/// Drive a job to its terminal state and persist the outcome.
pub(crate) async fn run_job(shared: Arc<EngineShared>, job: Arc<Job>) {
    let status = match run_rounds(&shared, &job).await {
        Ok(status) => status,
        Err(e) => {
            // Runtime failures inside the loop never leave the job dangling.
            warn!(job_id = %job.id, error = %e, "round loop aborted");
            job.push_log(LogEntry {
                at: now_ms(),
                kind: LogKind::Error,
                session_id: None,
                group_id: None,
                message: format!("job aborted: {}", e),
            });
            JobStatus::Stopped
        }
    };

    let finished_at = job.finish(status);
    let (posted, failed, skipped) = job.counts();

    if let Err(e) = shared
        .db
        .update_post_counts(&job.post_id, posted as i64, failed as i64, skipped as i64)
        .await
    {
        warn!(job_id = %job.id, error = %e, "failed to persist final counts");
    }

    let post_status = match status {
        JobStatus::Completed => PostStatus::Completed,
        _ => PostStatus::Cancelled,
    };
    if let Err(e) = shared
        .db
        .finish_post(&job.post_id, post_status, finished_at)
        .await
    {
        warn!(job_id = %job.id, error = %e, "failed to finalize post");
    }

    info!(
        job_id = %job.id,
        status = status.as_str(),
        posted, failed, skipped,
        rounds = job.rounds_completed(),
        "job finished"
    );
    shared.events.emit(Event::JobFinished {
        job_id: job.id.clone(),
        status: status.as_str().to_string(),
    });
}

async fn run_rounds(shared: &Arc<EngineShared>, job: &Arc<Job>) -> Result<JobStatus> {
    let pause_poll = Duration::from_millis(shared.config.engine.pause_poll_ms);
    let stop_poll = Duration::from_millis(shared.config.engine.stop_poll_ms);

    loop {
        if job.stop_requested() {
            return Ok(JobStatus::Stopped);
        }

        if job.pause_requested() {
            job.set_status(JobStatus::Paused);
            while job.pause_requested() && !job.stop_requested() {
                tokio::time::sleep(pause_poll).await;
            }
            if job.stop_requested() {
                return Ok(JobStatus::Stopped);
            }
            job.set_status(JobStatus::Running);
        }

        let assignments = resolve_round(shared, job).await?;
        let round = job.rounds_completed() + 1;

        if assignments.is_empty() {
            job.push_log(LogEntry::info("no deliverable groups this round"));
        }

        shared.events.emit(Event::RoundStarted {
            job_id: job.id.clone(),
            round,
        });

        let handles: Vec<_> = assignments
            .into_iter()
            .map(|(client, groups)| {
                tokio::spawn(run_driver(
                    Arc::clone(shared),
                    Arc::clone(job),
                    client,
                    groups,
                ))
            })
            .collect();

        let mut sent: u64 = 0;
        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok(count) => sent += count,
                Err(e) => warn!(job_id = %job.id, error = %e, "driver task panicked"),
            }
        }

        // A round truncated by stop does not count as completed.
        if job.stop_requested() {
            return Ok(JobStatus::Stopped);
        }

        let completed = job.record_round_completed();
        shared.events.emit(Event::RoundCompleted {
            job_id: job.id.clone(),
            round: completed,
            sent,
        });

        let (posted, failed, skipped) = job.counts();
        shared
            .db
            .update_post_counts(&job.post_id, posted as i64, failed as i64, skipped as i64)
            .await?;

        if let Some(max) = job.max_rounds {
            if completed >= max {
                return Ok(JobStatus::Completed);
            }
        }

        let pause = draw_round_pause(&shared.config.engine);
        if !sleep_unless(pause, stop_poll, || job.stop_requested()).await {
            return Ok(JobStatus::Stopped);
        }
    }
}

/// Jittered inter-round pause: uniform in [base - jitter, base + jitter].
fn draw_round_pause(engine: &crate::config::EngineConfig) -> Duration {
    let base = engine.round_pause_ms;
    let jitter = engine.round_pause_jitter_ms;
    let low = base.saturating_sub(jitter);
    let high = base + jitter;

    let millis = if low >= high {
        low
    } else {
        rand::thread_rng().gen_range(low..=high)
    };
    Duration::from_millis(millis)
}

/// Fresh group resolution for one round: usable sessions that still have a
/// live client, their deliverable groups, the ad's filters, a full shuffle,
/// and a per-session partition preserving shuffled order.
async fn resolve_round(
    shared: &EngineShared,
    job: &Job,
) -> Result<Vec<(Arc<dyn SessionClient>, Vec<Group>)>> {
    let now = now_ms();
    let sessions = shared.db.list_usable_sessions(job.tenant_id).await?;
    let selected = job.ad.selected_group_ids();

    let mut clients: HashMap<SessionId, Arc<dyn SessionClient>> = HashMap::new();
    let mut pool: Vec<Group> = Vec::new();

    for session in sessions {
        let Some(client) = shared.client_for(session.id).await else {
            continue;
        };

        let mut groups = shared.db.list_deliverable_groups(session.id, now).await?;

        if let Some(ref ids) = selected {
            groups.retain(|g| ids.contains(&g.id));
        }
        if job.ad.use_priority_groups {
            groups.retain(|g| g.is_priority);
        }
        if let Some(ref restrict) = job.restrict_groups {
            groups.retain(|g| restrict.contains(&g.id));
        }

        if !groups.is_empty() {
            clients.insert(session.id, client);
            pool.extend(groups);
        }
    }

    // Fresh random order every round, so a flood truncation never starves
    // the same tail of groups.
    pool.shuffle(&mut rand::thread_rng());

    let mut partitioned: HashMap<SessionId, Vec<Group>> = HashMap::new();
    for group in pool {
        partitioned.entry(group.session_id).or_default().push(group);
    }

    Ok(partitioned
        .into_iter()
        .filter_map(|(session_id, groups)| clients.get(&session_id).map(|c| (Arc::clone(c), groups)))
        .collect())
}
