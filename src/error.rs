//! Error types for Groupcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GroupcastError>;

#[derive(Error, Debug)]
pub enum GroupcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("no usable session for tenant")]
    NoUsableSession,

    #[error("no deliverable group for tenant")]
    NoDeliverableGroup,

    #[error("a job for ad {0} is already running")]
    JobAlreadyRunning(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors surfaced by a [`SessionClient`](crate::client::SessionClient).
///
/// This is the engine's taxonomy; the concrete client is the only place that
/// knows the platform's wire dialect and is responsible for decoding raw
/// responses into these kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Per-account throttle: wait `n` seconds before sending again.
    #[error("FLOOD_WAIT {0}")]
    FloodWait(u64),

    /// Per-group throttle: wait `n` seconds before posting in this chat.
    #[error("slowmode wait {0}")]
    SlowmodeWait(u64),

    /// The account cannot write to this chat.
    #[error("write forbidden")]
    WriteForbidden,

    /// The chat rejects plain sends (restricted mode, admin-only, etc).
    #[error("chat restricted")]
    ChatRestricted,

    /// The chat only accepts sends from premium accounts.
    #[error("premium required")]
    PremiumRequired,

    /// The session credential is dead; the account can no longer be used.
    #[error("auth revoked")]
    AuthRevoked,

    /// Connecting the session failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Anything else: network hiccups, timeouts, unclassified responses.
    #[error("{0}")]
    Transient(String),
}

impl ClientError {
    /// Whether a retry on a later round can reasonably succeed without
    /// manual intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::FloodWait(_)
                | ClientError::SlowmodeWait(_)
                | ClientError::Connect(_)
                | ClientError::Transient(_)
        )
    }
}
