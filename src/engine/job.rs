//! In-memory job state
//!
//! A [`Job`] is the runtime side of a broadcast: counters, control flags and
//! the log ring buffer. It is never persisted; the durable record is the
//! Post row. Controllers flip the request flags, engine tasks do everything
//! else.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::clock::now_ms;
use crate::types::{Ad, GroupId, SessionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Paused,
    Stopped,
    Completed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Sent,
    Failed,
    Skipped,
    Error,
}

/// One line in the job's ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: i64,
    pub kind: LogKind,
    pub session_id: Option<SessionId>,
    pub group_id: Option<GroupId>,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            at: now_ms(),
            kind: LogKind::Info,
            session_id: None,
            group_id: None,
            message: message.into(),
        }
    }

    pub fn delivery(
        kind: LogKind,
        session_id: SessionId,
        group_id: GroupId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            at: now_ms(),
            kind,
            session_id: Some(session_id),
            group_id: Some(group_id),
            message: message.into(),
        }
    }
}

/// Read-only snapshot of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: String,
    pub post_id: String,
    pub status: JobStatus,
    pub total_groups: u64,
    pub posted_groups: u64,
    pub failed_groups: u64,
    pub skipped_groups: u64,
    pub rounds_completed: u64,
    /// Sent / (sent + failed), in percent. 100 when nothing failed yet.
    pub success_rate: f64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

pub struct Job {
    pub id: String,
    pub tenant_id: TenantId,
    /// Snapshot of the ad at start time; later edits do not affect the run.
    pub ad: Ad,
    /// Fully rendered message text (ad content plus tenant brand line).
    pub content: String,
    pub post_id: String,
    pub started_at: i64,
    /// When set, rounds only target these groups (retry-failed runs).
    pub restrict_groups: Option<HashSet<GroupId>>,
    /// None means broadcast until stopped.
    pub max_rounds: Option<u64>,

    // Pacing resolved at start: ad overrides, then subscription hint, then config.
    pub min_group_delay_ms: u64,
    pub max_group_delay_ms: u64,
    pub group_cooldown_ms: u64,

    status: Mutex<JobStatus>,
    stop_requested: AtomicBool,
    pause_requested: AtomicBool,
    finished_at: AtomicI64,

    total_groups: AtomicU64,
    posted_groups: AtomicU64,
    failed_groups: AtomicU64,
    skipped_groups: AtomicU64,
    rounds_completed: AtomicU64,

    logs: Mutex<VecDeque<LogEntry>>,
    log_cap: usize,
    log_trim_to: usize,
}

pub struct JobSeed {
    pub tenant_id: TenantId,
    pub ad: Ad,
    pub content: String,
    pub post_id: String,
    pub restrict_groups: Option<HashSet<GroupId>>,
    pub max_rounds: Option<u64>,
    pub min_group_delay_ms: u64,
    pub max_group_delay_ms: u64,
    pub group_cooldown_ms: u64,
    pub log_cap: usize,
    pub log_trim_to: usize,
}

impl Job {
    pub fn new(seed: JobSeed) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: seed.tenant_id,
            ad: seed.ad,
            content: seed.content,
            post_id: seed.post_id,
            started_at: now_ms(),
            restrict_groups: seed.restrict_groups,
            max_rounds: seed.max_rounds,
            min_group_delay_ms: seed.min_group_delay_ms,
            max_group_delay_ms: seed.max_group_delay_ms,
            group_cooldown_ms: seed.group_cooldown_ms,
            status: Mutex::new(JobStatus::Running),
            stop_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            finished_at: AtomicI64::new(0),
            total_groups: AtomicU64::new(0),
            posted_groups: AtomicU64::new(0),
            failed_groups: AtomicU64::new(0),
            skipped_groups: AtomicU64::new(0),
            rounds_completed: AtomicU64::new(0),
            logs: Mutex::new(VecDeque::new()),
            log_cap: seed.log_cap,
            log_trim_to: seed.log_trim_to,
        }
    }

    // Control flags. Stop is sticky: once set it is never cleared.

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: JobStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Mark the job over. Returns the terminal timestamp.
    pub fn finish(&self, status: JobStatus) -> i64 {
        let now = now_ms();
        self.set_status(status);
        self.finished_at.store(now, Ordering::SeqCst);
        now
    }

    pub fn set_total_groups(&self, total: u64) {
        self.total_groups.store(total, Ordering::SeqCst);
    }

    pub fn record_sent(&self) {
        self.posted_groups.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed_groups.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skipped(&self) {
        self.skipped_groups.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_round_completed(&self) -> u64 {
        self.rounds_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.posted_groups.load(Ordering::SeqCst),
            self.failed_groups.load(Ordering::SeqCst),
            self.skipped_groups.load(Ordering::SeqCst),
        )
    }

    /// Append to the ring buffer, trimming to `log_trim_to` entries once the
    /// length exceeds `log_cap`. Appends and trims share the lock, so the
    /// length never observably exceeds the cap.
    pub fn push_log(&self, entry: LogEntry) {
        let mut logs = self.logs.lock().unwrap();
        logs.push_back(entry);
        if logs.len() > self.log_cap {
            let excess = logs.len() - self.log_trim_to;
            logs.drain(..excess);
        }
    }

    /// Newest `limit` entries, oldest first.
    pub fn log_tail(&self, limit: usize) -> Vec<LogEntry> {
        let logs = self.logs.lock().unwrap();
        let skip = logs.len().saturating_sub(limit);
        logs.iter().skip(skip).cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    pub fn stats(&self) -> JobStats {
        let (posted, failed, skipped) = self.counts();
        let attempted = posted + failed;
        let success_rate = if attempted == 0 {
            100.0
        } else {
            posted as f64 / attempted as f64 * 100.0
        };
        let finished_at = self.finished_at.load(Ordering::SeqCst);

        JobStats {
            job_id: self.id.clone(),
            post_id: self.post_id.clone(),
            status: self.status(),
            total_groups: self.total_groups.load(Ordering::SeqCst),
            posted_groups: posted,
            failed_groups: failed,
            skipped_groups: skipped,
            rounds_completed: self.rounds_completed(),
            success_rate,
            started_at: self.started_at,
            finished_at: if finished_at == 0 {
                None
            } else {
                Some(finished_at)
            },
        }
    }
}
