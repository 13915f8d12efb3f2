//! Mock session client for testing
//!
//! A configurable client double that can script per-group send outcomes,
//! simulate latency, fail connection, and record every send for later
//! verification. Used by the engine test suites in place of a platform SDK.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::client::{ClientFactory, ClientResult, GroupSnapshot, SentMessage, SessionClient};
use crate::error::ClientError;
use crate::types::{Session, SessionId};

/// One recorded send.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub session_id: SessionId,
    pub platform_group_id: i64,
    pub text: String,
}

#[derive(Default)]
struct MockScript {
    /// Queued outcomes per platform group id; popped front-first. An empty
    /// queue means success.
    outcomes: HashMap<i64, VecDeque<ClientResult<SentMessage>>>,
    /// Outcome applied to every send with no specific script.
    default_outcome: Option<ClientError>,
}

/// Shared state so tests can inspect a client after handing it to the engine.
#[derive(Clone)]
pub struct MockClient {
    session_id: SessionId,
    connected: Arc<AtomicBool>,
    connect_error: Option<ClientError>,
    delay: Duration,
    groups: Arc<Mutex<Vec<GroupSnapshot>>>,
    script: Arc<Mutex<MockScript>>,
    sends: Arc<Mutex<Vec<RecordedSend>>>,
}

impl MockClient {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            connected: Arc::new(AtomicBool::new(false)),
            connect_error: None,
            delay: Duration::ZERO,
            groups: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(MockScript::default())),
            sends: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every connect attempt fails with `error`.
    pub fn failing_connect(session_id: SessionId, error: ClientError) -> Self {
        let mut client = Self::new(session_id);
        client.connect_error = Some(error);
        client
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the groups returned by `sync_groups`.
    pub fn with_groups(self, groups: Vec<GroupSnapshot>) -> Self {
        *self.groups.lock().unwrap() = groups;
        self
    }

    /// Queue `outcome` for the next send into `platform_group_id`.
    pub fn script_send(&self, platform_group_id: i64, outcome: ClientResult<SentMessage>) {
        self.script
            .lock()
            .unwrap()
            .outcomes
            .entry(platform_group_id)
            .or_default()
            .push_back(outcome);
    }

    /// Fail every unscripted send with `error`.
    pub fn fail_all_sends(&self, error: ClientError) {
        self.script.lock().unwrap().default_outcome = Some(error);
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionClient for MockClient {
    async fn connect(&self) -> ClientResult<()> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn sync_groups(&self) -> ClientResult<Vec<GroupSnapshot>> {
        if !self.is_connected() {
            return Err(ClientError::Transient("not connected".to_string()));
        }
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn send_message(&self, platform_group_id: i64, text: &str) -> ClientResult<SentMessage> {
        if !self.is_connected() {
            return Err(ClientError::Transient("not connected".to_string()));
        }
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let outcome = {
            let mut script = self.script.lock().unwrap();
            match script
                .outcomes
                .get_mut(&platform_group_id)
                .and_then(|q| q.pop_front())
            {
                Some(outcome) => outcome,
                None => match &script.default_outcome {
                    Some(e) => Err(e.clone()),
                    None => Ok(SentMessage {
                        message_id: Some(platform_group_id ^ 0x5eed),
                    }),
                },
            }
        };

        if outcome.is_ok() {
            self.sends.lock().unwrap().push(RecordedSend {
                session_id: self.session_id,
                platform_group_id,
                text: text.to_string(),
            });
        }
        outcome
    }
}

/// Factory handing out pre-registered mock clients by session id.
#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<HashMap<SessionId, Arc<MockClient>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: MockClient) -> Arc<MockClient> {
        let client = Arc::new(client);
        self.clients
            .lock()
            .unwrap()
            .insert(client.session_id, Arc::clone(&client));
        client
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<MockClient>> {
        self.clients.lock().unwrap().get(&session_id).cloned()
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn create(&self, session: &Session) -> ClientResult<Arc<dyn SessionClient>> {
        let client = self
            .get(session.id)
            .ok_or_else(|| ClientError::Connect(format!("no mock for session {}", session.id)))?;
        Ok(client as Arc<dyn SessionClient>)
    }
}
