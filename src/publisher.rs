//! Scheduled-ad publishing
//!
//! A minute-granularity loop that fires due scheduled ads into the engine,
//! plus parsing of the human-readable schedule strings tenants type in.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{now_ms, CronSpec};
use crate::db::Database;
use crate::engine::BroadcastEngine;
use crate::error::{GroupcastError, Result};

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600; // 30 days

/// Fires due scheduled ads once a minute.
pub struct ScheduledPublisher {
    db: Database,
    engine: Arc<BroadcastEngine>,
}

impl ScheduledPublisher {
    pub fn new(db: Database, engine: Arc<BroadcastEngine>) -> Self {
        Self { db, engine }
    }

    /// Spawn the every-minute loop.
    pub fn spawn(self) -> JoinHandle<()> {
        let publisher = Arc::new(self);
        CronSpec::EveryMinute.spawn("scheduled_publisher", move || {
            let publisher = Arc::clone(&publisher);
            async move { publisher.tick().await }
        })
    }

    /// One scan: start every due ad, recording success or failure on the ad
    /// row. A failing ad never stops the others.
    pub async fn tick(&self) -> Result<()> {
        let now = now_ms();
        let due = self.db.list_due_scheduled_ads(now).await?;

        for ad in due {
            match self.engine.start_posting(ad.tenant_id, ad.id).await {
                Ok(job) => {
                    info!(ad_id = ad.id, job_id = %job.id, "scheduled ad published");
                    self.db.mark_ad_published(ad.id, now).await?;
                }
                Err(e) => {
                    warn!(ad_id = ad.id, error = %e, "scheduled ad failed to start");
                    self.db.mark_ad_schedule_failed(ad.id, &e.to_string()).await?;
                }
            }
        }

        Ok(())
    }
}

/// Parse a schedule string into a DateTime
///
/// Supports multiple formats:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next friday 10am"
/// - Random intervals: "random:10m-20m", anchored to `last_scheduled` so a
///   chain of scheduled ads drifts forward instead of clustering.
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_schedule(input: &str, last_scheduled: Option<i64>) -> Result<DateTime<Utc>> {
    if input.is_empty() {
        return Err(GroupcastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.starts_with("random:") {
        return parse_random_schedule(input, last_scheduled);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(GroupcastError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| GroupcastError::InvalidInput("Duration out of range".to_string()));
    }

    Err(GroupcastError::InvalidInput(format!(
        "Could not parse duration: {}",
        input
    )))
}

fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| GroupcastError::InvalidInput(format!("Could not parse time: {}", e)))
}

/// Parse random schedule format: "random:MIN-MAX"
fn parse_random_schedule(input: &str, last_scheduled: Option<i64>) -> Result<DateTime<Utc>> {
    let range_part = input
        .strip_prefix("random:")
        .ok_or_else(|| GroupcastError::InvalidInput("Invalid random format".to_string()))?;

    let parts: Vec<&str> = range_part.split('-').collect();
    if parts.len() != 2 {
        return Err(GroupcastError::InvalidInput(
            "Random format must be MIN-MAX".to_string(),
        ));
    }

    let min_duration = parse_duration(parts[0])?;
    let max_duration = parse_duration(parts[1])?;
    validate_random_range(min_duration, max_duration)?;

    let base_time = match last_scheduled {
        Some(ms) => DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now),
        None => Utc::now(),
    };

    let min_secs = min_duration.num_seconds();
    let max_secs = max_duration.num_seconds();
    let random_secs = rand::thread_rng().gen_range(min_secs..=max_secs);
    let random_duration = Duration::try_seconds(random_secs).unwrap_or(min_duration);

    Ok(base_time + random_duration)
}

fn validate_random_range(min: Duration, max: Duration) -> Result<()> {
    let min_secs = min.num_seconds();
    let max_secs = max.num_seconds();

    if min_secs < MIN_RANDOM_SECONDS {
        return Err(GroupcastError::InvalidInput(format!(
            "Minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }

    if max_secs > MAX_RANDOM_SECONDS {
        return Err(GroupcastError::InvalidInput(format!(
            "Maximum random interval must be less than {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }

    if min_secs >= max_secs {
        return Err(GroupcastError::InvalidInput(
            "Minimum must be less than maximum".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // DURATION PARSING TESTS

    #[test]
    fn test_parse_duration_minutes() {
        let result = parse_schedule("30m", None);
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let diff = (scheduled_time - Utc::now()).num_minutes();
        assert!(
            (29..=31).contains(&diff),
            "Expected ~30 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_duration_hours() {
        let scheduled_time = parse_schedule("2h", None).unwrap();
        let diff = (scheduled_time - Utc::now()).num_minutes();
        assert!(
            (119..=121).contains(&diff),
            "Expected ~120 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_duration_days() {
        let scheduled_time = parse_schedule("1d", None).unwrap();
        let diff = (scheduled_time - Utc::now()).num_hours();
        assert!((23..=25).contains(&diff), "Expected ~24 hours, got {}", diff);
    }

    // NATURAL LANGUAGE TESTS

    #[test]
    fn test_parse_tomorrow() {
        let result = parse_schedule("tomorrow", None);
        assert!(result.is_ok());

        let diff = (result.unwrap() - Utc::now()).num_hours();
        assert!((20..=28).contains(&diff), "Expected ~24 hours, got {}", diff);
    }

    // RANDOM SCHEDULING TESTS

    #[test]
    fn test_parse_random_without_anchor() {
        let scheduled_time = parse_schedule("random:10m-20m", None).unwrap();
        let diff = (scheduled_time - Utc::now()).num_minutes();
        assert!(
            (10..=20).contains(&diff),
            "Expected 10-20 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_random_anchored_to_last_scheduled() {
        let last = Utc::now().timestamp_millis() + 3_600_000;
        let scheduled_time = parse_schedule("random:10m-20m", Some(last)).unwrap();

        let diff = (scheduled_time.timestamp_millis() - last) / 60_000;
        assert!(
            (10..=20).contains(&diff),
            "Expected 10-20 minutes after anchor, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_random_mixed_units() {
        let scheduled_time = parse_schedule("random:30m-2h", None).unwrap();
        let diff = (scheduled_time - Utc::now()).num_minutes();
        assert!((30..=120).contains(&diff));
    }

    // ERROR HANDLING TESTS

    #[test]
    fn test_parse_empty_string() {
        assert!(parse_schedule("", None).is_err());
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(parse_schedule("whenever feels right", None).is_err());
    }

    #[test]
    fn test_parse_random_invalid_format() {
        assert!(parse_schedule("random:invalid", None).is_err());
    }

    #[test]
    fn test_parse_random_min_greater_than_max() {
        assert!(parse_schedule("random:2h-1h", None).is_err());
    }

    #[test]
    fn test_parse_random_too_short() {
        assert!(parse_schedule("random:1s-10s", None).is_err());
    }

    #[test]
    fn test_parse_random_too_long() {
        assert!(parse_schedule("random:1d-40d", None).is_err());
    }
}
