//! Session client abstraction
//!
//! The engine's sole dependency on the messaging platform. A concrete
//! implementation wraps the platform SDK, holds one live connection per
//! session, and decodes platform responses into [`ClientError`] kinds.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ClientError;
use crate::types::{GroupKind, Session};

pub mod mock;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// One chat as reported by the platform during a group sync.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    pub platform_id: i64,
    pub title: String,
    pub kind: GroupKind,
    pub member_count: i64,
    pub username: Option<String>,
}

/// Result of a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: Option<i64>,
}

/// A live, authenticated connection for one session.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Establish the connection. Idempotent on an already-connected client.
    async fn connect(&self) -> ClientResult<()>;

    async fn disconnect(&self) -> ClientResult<()>;

    fn is_connected(&self) -> bool;

    /// Enumerate the groups the account has joined.
    async fn sync_groups(&self) -> ClientResult<Vec<GroupSnapshot>>;

    /// Send `text` into the chat identified by `platform_group_id`.
    async fn send_message(&self, platform_group_id: i64, text: &str) -> ClientResult<SentMessage>;
}

/// Builds clients for sessions. The engine connects lazily: a client is
/// created the first time a job needs its session.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, session: &Session) -> ClientResult<Arc<dyn SessionClient>>;
}
