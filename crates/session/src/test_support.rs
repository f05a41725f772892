// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: clocks, mocks, and assertion helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::alert::{AlertGateway, WarningChoice};
use crate::backend::AuthBackend;
use crate::clock::Clock;
use crate::error::SessionError;
use crate::state::StateTransition;
use crate::storage::{MemoryStorage, Storage};
use crate::token::{StoredUser, TokenPair};

/// Fixed epoch the test clock starts at (2023-11-14T22:13:20Z).
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

/// Wall clock that follows tokio's (pausable) clock.
///
/// [`skip`](Self::skip) moves wall time forward without firing any tokio
/// timer, which is what a suspended background tab looks like.
pub struct TestClock {
    origin: Instant,
    skipped_ms: AtomicU64,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), skipped_ms: AtomicU64::new(0) }
    }

    pub fn skip(&self, by: Duration) {
        self.skipped_ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        TEST_EPOCH_MS
            + self.origin.elapsed().as_millis() as u64
            + self.skipped_ms.load(Ordering::Relaxed)
    }
}

/// Build an unsigned JWT-shaped token whose payload carries `created_at`.
pub fn make_token(created_at: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "created_at": created_at }).to_string());
    format!("{header}.{payload}.sig")
}

/// A complete pair whose access token was minted at `created_at_ms`.
pub fn token_pair(created_at_ms: u64, tag: &str) -> TokenPair {
    TokenPair::new(make_token(json!(created_at_ms)), format!("refresh-{tag}"))
}

/// Session record for `username` with tokens minted at `created_at_ms`.
pub fn stored_user(username: &str, created_at_ms: u64) -> StoredUser {
    let mut profile = Map::new();
    profile.insert("username".into(), json!(username));
    StoredUser::new(token_pair(created_at_ms, "login"), profile)
}

/// Scripted [`AuthBackend`] with call counters.
///
/// Unscripted calls succeed: refresh mints a pair stamped with the mock's
/// clock, heartbeat answers 200.
pub struct MockBackend {
    clock: Arc<dyn Clock>,
    login: Mutex<Option<Result<StoredUser, SessionError>>>,
    refreshes: Mutex<VecDeque<Result<TokenPair, SessionError>>>,
    heartbeats: Mutex<VecDeque<Result<(), SessionError>>>,
    logout_result: Mutex<Result<(), SessionError>>,
    login_delay: Duration,
    refresh_delay: Duration,
    logout_delay: Duration,
    login_calls: AtomicU32,
    refresh_calls: AtomicU32,
    logout_calls: AtomicU32,
    heartbeat_times: Mutex<Vec<Instant>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            login: Mutex::new(None),
            refreshes: Mutex::new(VecDeque::new()),
            heartbeats: Mutex::new(VecDeque::new()),
            logout_result: Mutex::new(Ok(())),
            login_delay: Duration::ZERO,
            refresh_delay: Duration::ZERO,
            logout_delay: Duration::ZERO,
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            heartbeat_times: Mutex::new(Vec::new()),
            refresh_tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn login_delay(mut self, d: Duration) -> Self {
        self.login_delay = d;
        self
    }

    pub fn refresh_delay(mut self, d: Duration) -> Self {
        self.refresh_delay = d;
        self
    }

    pub fn logout_delay(mut self, d: Duration) -> Self {
        self.logout_delay = d;
        self
    }

    /// Answer every login with `result` instead of a fresh record.
    pub fn set_login(&self, result: Result<StoredUser, SessionError>) {
        *self.login.lock() = Some(result);
    }

    pub fn push_refresh(&self, result: Result<TokenPair, SessionError>) {
        self.refreshes.lock().push_back(result);
    }

    pub fn push_heartbeat(&self, result: Result<(), SessionError>) {
        self.heartbeats.lock().push_back(result);
    }

    pub fn set_logout(&self, result: Result<(), SessionError>) {
        *self.logout_result.lock() = result;
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> u32 {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.heartbeat_times.lock().len()
    }

    /// Tokio instants at which heartbeats were received.
    pub fn heartbeat_times(&self) -> Vec<Instant> {
        self.heartbeat_times.lock().clone()
    }

    /// Refresh tokens presented to the refresh endpoint, in order.
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn login(&self, username: &str, _password: &str) -> Result<StoredUser, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        match self.login.lock().clone() {
            Some(result) => result,
            None => Ok(stored_user(username, self.clock.now_ms())),
        }
    }

    async fn refresh(&self, refresh_token: &str, now_ms: u64) -> Result<TokenPair, SessionError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen.lock().push(refresh_token.to_owned());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let scripted = self.refreshes.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(token_pair(now_ms, &n.to_string())))
    }

    async fn logout(&self, _access_token: &str) -> Result<(), SessionError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if !self.logout_delay.is_zero() {
            tokio::time::sleep(self.logout_delay).await;
        }
        self.logout_result.lock().clone()
    }

    async fn heartbeat(&self, _access_token: &str) -> Result<(), SessionError> {
        self.heartbeat_times.lock().push(Instant::now());
        let scripted = self.heartbeats.lock().pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

/// How [`ScriptedAlerts`] answers one warning prompt.
#[derive(Debug, Clone, Copy)]
pub enum AlertScript {
    /// Answer with `choice` after `after`.
    Answer { after: Duration, choice: WarningChoice },
    /// Never answer.
    Ignore,
}

/// [`AlertGateway`] that replays a script and records what it was shown.
///
/// Prompts beyond the end of the script are ignored.
#[derive(Default)]
pub struct ScriptedAlerts {
    script: Mutex<VecDeque<AlertScript>>,
    warnings: Mutex<Vec<Duration>>,
    expired: AtomicU32,
}

impl ScriptedAlerts {
    pub fn new(script: impl IntoIterator<Item = AlertScript>) -> Self {
        Self { script: Mutex::new(script.into_iter().collect()), ..Default::default() }
    }

    /// Countdowns shown so far.
    pub fn warnings(&self) -> Vec<Duration> {
        self.warnings.lock().clone()
    }

    pub fn expired_notices(&self) -> u32 {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertGateway for ScriptedAlerts {
    async fn warn_and_await_choice(&self, remaining: Duration) -> WarningChoice {
        self.warnings.lock().push(remaining);
        let step = self.script.lock().pop_front().unwrap_or(AlertScript::Ignore);
        match step {
            AlertScript::Answer { after, choice } => {
                tokio::time::sleep(after).await;
                choice
            }
            AlertScript::Ignore => std::future::pending().await,
        }
    }

    async fn notify_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory [`Storage`] that can be told to fail writes and counts clears.
#[derive(Default)]
pub struct TestStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
    clears: AtomicU32,
}

impl TestStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("storage write refused");
        }
        Ok(())
    }
}

impl Storage for TestStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.remove(key)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.clear()
    }
}

/// Collects every published transition.
#[derive(Clone, Default)]
pub struct TransitionLog {
    events: Arc<Mutex<Vec<StateTransition>>>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener closure to hand to `subscribe`.
    pub fn listener(&self) -> impl Fn(&StateTransition) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |t| events.lock().push(t.clone())
    }

    pub fn events(&self) -> Vec<StateTransition> {
        self.events.lock().clone()
    }

    /// `(next, cause)` pairs, the usual thing to assert on.
    pub fn path(&self) -> Vec<(crate::state::SessionState, crate::state::TransitionCause)> {
        self.events.lock().iter().map(|t| (t.next, t.cause)).collect()
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
