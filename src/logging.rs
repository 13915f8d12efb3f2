//! Tracing setup for engine hosts
//!
//! The engine itself only emits `tracing` events; hosts call [`init`] (or
//! [`init_default`]) once at startup to install a subscriber. Format and
//! level come from `GROUPCAST_LOG_FORMAT` / `GROUPCAST_LOG_LEVEL`, with
//! `RUST_LOG` taking precedence when set.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// sqlx logs every statement at info; keep it down unless asked for.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text to stderr, suitable for piping.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
    /// Colored multi-line output for development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        write!(f, "{}", name)
    }
}

/// Install the global subscriber.
///
/// `level` is an EnvFilter directive string ("debug", "groupcast=trace", ...).
/// `RUST_LOG` overrides it when present.
///
/// # Panics
///
/// Panics if a subscriber is already installed.
pub fn init(format: LogFormat, level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .init(),
        LogFormat::Pretty => builder
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

/// [`init`] driven by `GROUPCAST_LOG_FORMAT` and `GROUPCAST_LOG_LEVEL`,
/// falling back to text output with the default directives.
pub fn init_default() {
    let format = std::env::var("GROUPCAST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let level =
        std::env::var("GROUPCAST_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_string());

    init(format, &level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            let parsed: LogFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
    }

    #[test]
    fn test_format_parse_is_case_insensitive() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_format_parse_rejects_unknown() {
        let err = "syslog".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("syslog"));
    }

    #[test]
    fn test_default_format_is_text() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
