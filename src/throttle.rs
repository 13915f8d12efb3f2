//! Per-session rate limiting
//!
//! Tracks send counters and cooldown timestamps per session and implements
//! the anti-throttle state machine: message-count cooldowns, flood handling,
//! consecutive-error backoff, and the terminal freeze for dead sessions.
//!
//! State is in-memory and per-process; it resets on restart together with
//! the jobs that feed it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::types::SessionId;

/// Runtime throttle state for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionRateState {
    /// Sends since the last armed cooldown.
    pub messages_sent: u32,
    /// Cumulative flood signals over the session's lifetime in this process.
    pub flood_count: u32,
    pub consecutive_errors: u32,
    /// When set and in the future, the session must not send.
    pub cooldown_until: Option<i64>,
}

/// What the driver must do after reporting a flood signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodAction {
    /// Short wait: the driver sleeps inline and then continues its list.
    SleepInline { seconds: u64 },
    /// Long wait: a cooldown was armed; the driver's remaining groups will
    /// be skipped by the cooldown gate.
    CooldownArmed,
}

/// Registry of [`SessionRateState`] keyed by session.
///
/// Only the driver that owns a session mutates its entry, so a single lock
/// with short critical sections is sufficient; cross-driver reads are
/// diagnostic only.
pub struct RateRegistry {
    session_message_limit: u32,
    session_cooldown_ms: u64,
    max_flood_per_session: u32,
    flood_freeze_ms: u64,
    max_consecutive_errors: u32,
    error_cooldown_ms: u64,
    states: Mutex<HashMap<SessionId, SessionRateState>>,
}

impl RateRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            session_message_limit: config.session_message_limit,
            session_cooldown_ms: config.session_cooldown_ms,
            max_flood_per_session: config.max_flood_per_session,
            flood_freeze_ms: config.flood_freeze_ms,
            max_consecutive_errors: config.max_consecutive_errors,
            error_cooldown_ms: 5 * 60 * 1000,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn with_state<T>(&self, session_id: SessionId, f: impl FnOnce(&mut SessionRateState) -> T) -> T {
        let mut states = self.states.lock().unwrap();
        f(states.entry(session_id).or_default())
    }

    /// Cooldown gate, checked before every send.
    ///
    /// Returns the remaining cooldown in ms when the session must wait.
    /// An elapsed cooldown is cleared lazily here, together with the send
    /// counter for the new window.
    pub fn cooldown_remaining(&self, session_id: SessionId, now: i64) -> Option<u64> {
        self.with_state(session_id, |state| match state.cooldown_until {
            Some(until) if until > now => Some((until - now) as u64),
            Some(_) => {
                state.cooldown_until = None;
                state.messages_sent = 0;
                None
            }
            None => None,
        })
    }

    /// Record a successful send. Returns `true` when the send counter hit
    /// the session limit and a cooldown was armed.
    pub fn on_success(&self, session_id: SessionId, now: i64) -> bool {
        self.with_state(session_id, |state| {
            state.messages_sent += 1;
            state.consecutive_errors = 0;

            if state.messages_sent >= self.session_message_limit {
                state.cooldown_until = Some(now + self.session_cooldown_ms as i64);
                state.messages_sent = 0;
                true
            } else {
                false
            }
        })
    }

    /// Record a flood signal telling the account to wait `wait_seconds`.
    pub fn on_flood(&self, session_id: SessionId, now: i64, wait_seconds: u64) -> FloodAction {
        self.with_state(session_id, |state| {
            state.flood_count += 1;
            state.consecutive_errors += 1;

            let mut action = if wait_seconds <= 60 {
                FloodAction::SleepInline {
                    seconds: wait_seconds,
                }
            } else {
                state.cooldown_until = Some(now + (wait_seconds * 1000) as i64);
                FloodAction::CooldownArmed
            };

            if state.flood_count >= self.max_flood_per_session {
                state.cooldown_until = Some(now + self.flood_freeze_ms as i64);
                action = FloodAction::CooldownArmed;
            }

            action
        })
    }

    /// Record a transient failure. Returns `true` when the consecutive-error
    /// threshold armed a cooldown.
    pub fn on_transient_error(&self, session_id: SessionId, now: i64) -> bool {
        self.with_state(session_id, |state| {
            state.consecutive_errors += 1;
            if state.consecutive_errors >= self.max_consecutive_errors {
                state.cooldown_until = Some(now + self.error_cooldown_ms as i64);
                state.consecutive_errors = 0;
                true
            } else {
                false
            }
        })
    }

    /// Park the session for good. Used when the platform revokes the
    /// session's authorization.
    pub fn freeze_indefinitely(&self, session_id: SessionId) {
        self.with_state(session_id, |state| {
            state.cooldown_until = Some(i64::MAX);
        });
    }

    /// Diagnostic snapshot of a session's state.
    pub fn snapshot(&self, session_id: SessionId) -> SessionRateState {
        self.with_state(session_id, |state| state.clone())
    }
}
