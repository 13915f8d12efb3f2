//! Time primitives: wall clock, cancellable sleeps and cron-style schedules.
//!
//! Every periodic loop in the engine runs off [`CronSpec::spawn`], and every
//! long engine sleep goes through [`sleep_unless`] so a stop flag can cut it
//! short within one poll step.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{GroupcastError, Result};

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sleep for `total`, polling `cancelled` every `step`. Returns `true` when
/// the sleep ran to completion, `false` when it was cut short.
pub async fn sleep_unless<F>(total: Duration, step: Duration, cancelled: F) -> bool
where
    F: Fn() -> bool,
{
    let mut remaining = total;
    let step = if step.is_zero() {
        Duration::from_millis(1)
    } else {
        step
    };

    while !remaining.is_zero() {
        if cancelled() {
            return false;
        }
        let chunk = remaining.min(step);
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
    !cancelled()
}

/// Periodic schedule for maintenance-style loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronSpec {
    EveryMinute,
    EveryHour,
    /// Every N hours, anchored to the top of the hour.
    EveryHours(u32),
    /// Once a day at HH:MM UTC.
    DailyAt { hour: u32, minute: u32 },
}

impl CronSpec {
    /// Parse a schedule string.
    ///
    /// Accepted forms: `"every minute"`, `"every hour"`, `"every N hours"`,
    /// `"daily at HH:MM"`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim().to_lowercase();
        match s.as_str() {
            "every minute" => return Ok(CronSpec::EveryMinute),
            "every hour" => return Ok(CronSpec::EveryHour),
            _ => {}
        }

        if let Some(rest) = s.strip_prefix("every ") {
            if let Some(hours) = rest.strip_suffix(" hours") {
                let n: u32 = hours.parse().map_err(|_| {
                    GroupcastError::InvalidInput(format!("Invalid hour count in '{}'", input))
                })?;
                if n == 0 || n > 24 {
                    return Err(GroupcastError::InvalidInput(format!(
                        "Hour count must be 1..=24 in '{}'",
                        input
                    )));
                }
                return Ok(CronSpec::EveryHours(n));
            }
        }

        if let Some(hhmm) = s.strip_prefix("daily at ") {
            let parts: Vec<&str> = hhmm.split(':').collect();
            if parts.len() == 2 {
                let hour: u32 = parts[0].parse().map_err(|_| {
                    GroupcastError::InvalidInput(format!("Invalid hour in '{}'", input))
                })?;
                let minute: u32 = parts[1].parse().map_err(|_| {
                    GroupcastError::InvalidInput(format!("Invalid minute in '{}'", input))
                })?;
                if hour > 23 || minute > 59 {
                    return Err(GroupcastError::InvalidInput(format!(
                        "Time out of range in '{}'",
                        input
                    )));
                }
                return Ok(CronSpec::DailyAt { hour, minute });
            }
        }

        Err(GroupcastError::InvalidInput(format!(
            "Could not parse schedule: '{}'",
            input
        )))
    }

    /// Next fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            CronSpec::EveryMinute => {
                let truncated = after
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(after);
                truncated + chrono::Duration::minutes(1)
            }
            CronSpec::EveryHour => {
                let truncated = truncate_to_hour(after);
                truncated + chrono::Duration::hours(1)
            }
            CronSpec::EveryHours(n) => {
                let midnight = truncate_to_hour(after).with_hour(0).unwrap_or(after);
                let slot = after.hour() / n;
                midnight + chrono::Duration::hours(i64::from((slot + 1) * n))
            }
            CronSpec::DailyAt { hour, minute } => {
                let today = Utc
                    .with_ymd_and_hms(after.year(), after.month(), after.day(), *hour, *minute, 0)
                    .single()
                    .unwrap_or(after);
                if today > after {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
        }
    }

    /// Spawn a loop firing `f` on this schedule. Failures are logged and the
    /// loop keeps running; one loop can never block another.
    pub fn spawn<F, Fut>(self, name: &'static str, f: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = self.next_fire_after(now);
                let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                debug!(loop_name = name, next = %next, "waiting for next fire");
                tokio::time::sleep(wait).await;

                if let Err(e) = f().await {
                    warn!(loop_name = name, error = %e, "periodic loop iteration failed");
                }
            }
        })
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_specs() {
        assert_eq!(CronSpec::parse("every minute").unwrap(), CronSpec::EveryMinute);
        assert_eq!(CronSpec::parse("every hour").unwrap(), CronSpec::EveryHour);
        assert_eq!(
            CronSpec::parse("every 6 hours").unwrap(),
            CronSpec::EveryHours(6)
        );
        assert_eq!(
            CronSpec::parse("daily at 03:00").unwrap(),
            CronSpec::DailyAt { hour: 3, minute: 0 }
        );
        assert_eq!(
            CronSpec::parse("Daily At 23:59").unwrap(),
            CronSpec::DailyAt {
                hour: 23,
                minute: 59
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CronSpec::parse("").is_err());
        assert!(CronSpec::parse("every 0 hours").is_err());
        assert!(CronSpec::parse("every 48 hours").is_err());
        assert!(CronSpec::parse("daily at 25:00").is_err());
        assert!(CronSpec::parse("daily at 03:75").is_err());
        assert!(CronSpec::parse("sometimes").is_err());
    }

    #[test]
    fn test_next_fire_every_minute() {
        let next = CronSpec::EveryMinute.next_fire_after(at(10, 30, 20));
        assert_eq!(next, at(10, 31, 0));
    }

    #[test]
    fn test_next_fire_every_hour() {
        let next = CronSpec::EveryHour.next_fire_after(at(10, 30, 20));
        assert_eq!(next, at(11, 0, 0));
    }

    #[test]
    fn test_next_fire_every_six_hours() {
        let spec = CronSpec::EveryHours(6);
        assert_eq!(spec.next_fire_after(at(0, 10, 0)), at(6, 0, 0));
        assert_eq!(spec.next_fire_after(at(5, 59, 59)), at(6, 0, 0));
        assert_eq!(spec.next_fire_after(at(6, 0, 1)), at(12, 0, 0));
        // 18:xx rolls into the next day
        let next = spec.next_fire_after(at(23, 0, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_daily() {
        let spec = CronSpec::DailyAt { hour: 3, minute: 0 };
        assert_eq!(spec.next_fire_after(at(1, 0, 0)), at(3, 0, 0));
        let next = spec.next_fire_after(at(3, 0, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 16, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_sleep_unless_completes() {
        let done = sleep_unless(
            Duration::from_millis(20),
            Duration::from_millis(5),
            || false,
        )
        .await;
        assert!(done);
    }

    #[tokio::test]
    async fn test_sleep_unless_cancelled_immediately() {
        let start = std::time::Instant::now();
        let done = sleep_unless(Duration::from_secs(60), Duration::from_millis(5), || true).await;
        assert!(!done);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
