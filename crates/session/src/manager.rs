// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle state machine.
//!
//! One manager owns one session. While the session is live it runs four
//! timer tasks under a per-session [`CancellationToken`]:
//!
//! - inactivity: warning prompt and hard expiry, re-armed on every touch
//! - background refresh: every refresh interval, only when the user is idle
//! - heartbeat: liveness ping, refresh on 401, backoff on 429
//! - refresh events: expires the session when any refresh fails
//!
//! All transitions go through [`Inner::transition_from`], which checks the
//! current state under a lock, so a late timer or a stale network answer can
//! never move a session that already ended.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityClock;
use crate::alert::{AlertGateway, WarningChoice};
use crate::backend::AuthBackend;
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::heartbeat::{pulse, HeartbeatBackoff, Pulse};
use crate::http::LogoutGate;
use crate::refresher::{RefreshEvent, RefreshOutcome, TokenRefresher};
use crate::state::{
    ActivityKind, Deadlines, SessionState, StateTransition, TransitionCause, Visibility,
};
use crate::storage::Storage;
use crate::token::{TokenStore, UserIdentity};

type Listener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Registered transition callbacks.
#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(i, _)| *i != id);
    }

    fn publish(&self, event: &StateTransition) {
        let snapshot: Vec<Listener> = self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Handle returned by `subscribe`; the listener is removed when this is
/// dropped or [`unsubscribe`](Self::unsubscribe)d.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

struct Machine {
    state: SessionState,
    seq: u64,
}

struct Inner {
    config: SessionConfig,
    activity: Arc<ActivityClock>,
    tokens: Arc<TokenStore>,
    refresher: Arc<TokenRefresher>,
    backend: Arc<dyn AuthBackend>,
    alerts: Arc<dyn AlertGateway>,
    storage: Arc<dyn Storage>,
    gate: Arc<LogoutGate>,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<SessionState>,
    listeners: Arc<Listeners>,
    /// Parent of every session's timer token; cancelled by `dispose`.
    root: CancellationToken,
    /// Timer token of the live session, if any.
    timers: Mutex<Option<CancellationToken>>,
    /// Deadlines fixed when the warning prompt opened.
    prompt: Mutex<Option<Deadlines>>,
    /// Wakes the inactivity task to re-evaluate deadlines immediately.
    recheck: Notify,
}

/// Owner of the session state machine and its timers.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<Inner>,
}

impl SessionLifecycleManager {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AuthBackend>,
        alerts: Arc<dyn AlertGateway>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let activity = Arc::new(ActivityClock::new(Arc::clone(&clock), Arc::clone(&storage)));
        let tokens = Arc::new(TokenStore::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            config.access_token_grace(),
        ));
        let gate = Arc::new(LogoutGate::default());
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&backend),
            Arc::clone(&tokens),
            clock,
            Arc::clone(&gate),
        ));
        let (state_tx, _) = watch::channel(SessionState::LoggedOut);
        Self {
            inner: Arc::new(Inner {
                config,
                activity,
                tokens,
                refresher,
                backend,
                alerts,
                storage,
                gate,
                machine: Mutex::new(Machine { state: SessionState::LoggedOut, seq: 0 }),
                state_tx,
                listeners: Arc::new(Listeners::default()),
                root: CancellationToken::new(),
                timers: Mutex::new(None),
                prompt: Mutex::new(None),
                recheck: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch the current state.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a callback for every transition, in order.
    ///
    /// Callbacks run synchronously on the transitioning task and must not block.
    pub fn subscribe(
        &self,
        listener: impl Fn(&StateTransition) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.listeners.add(Arc::new(listener));
        Subscription { id, listeners: Arc::downgrade(&self.inner.listeners) }
    }

    /// Current warning/expiry deadlines while the session is live.
    ///
    /// While the warning prompt is open these are the prompt's deadlines,
    /// which later activity does not move.
    pub fn deadlines(&self) -> Option<Deadlines> {
        if !self.state().is_live() {
            return None;
        }
        if let Some(prompt) = *self.inner.prompt.lock() {
            return Some(prompt);
        }
        let last = self.inner.activity.last_activity()?;
        Some(Deadlines::from_last_activity(last, &self.inner.config))
    }

    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.inner.activity
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.inner.refresher
    }

    pub fn logout_gate(&self) -> &Arc<LogoutGate> {
        &self.inner.gate
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.inner.tokens.user().map(|u| u.identity())
    }

    /// Exchange credentials for a session and start its timers.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserIdentity, SessionError> {
        let inner = &self.inner;
        if inner.gate.is_active() {
            return Err(SessionError::LoggingOut);
        }
        let Some(seq) = inner.transition_seq(
            |s| s == SessionState::LoggedOut,
            SessionState::Authenticating,
            TransitionCause::Login,
        ) else {
            return Err(SessionError::AlreadyAuthenticated);
        };

        let user = match inner.backend.login(username, password).await {
            Ok(user) => user,
            Err(e) => {
                warn!(err = %e, "login failed");
                inner.transition_since(seq, SessionState::LoggedOut, TransitionCause::LoginFailed);
                return Err(e);
            }
        };
        // A logout (or any other transition) while the backend answered
        // abandons this attempt; its tokens must not be stored.
        if inner.seq() != seq || inner.gate.is_active() {
            debug!("login answer arrived after the attempt was abandoned, discarding");
            return Err(SessionError::LoggingOut);
        }
        let generation = match inner.tokens.set(user.clone()) {
            Ok(generation) => generation,
            Err(e) => {
                warn!(err = %e, "failed to store session");
                inner.transition_since(seq, SessionState::LoggedOut, TransitionCause::LoginFailed);
                return Err(e);
            }
        };
        if !inner.transition_since(seq, SessionState::Active, TransitionCause::Login) {
            debug!("login abandoned while storing the session, discarding");
            if inner.tokens.clear_if(generation) {
                inner.clear_local();
            }
            return Err(SessionError::LoggingOut);
        }
        inner.activity.touch();
        Inner::arm(inner);
        info!(user = user.username().unwrap_or("-"), "logged in");
        Ok(user.identity())
    }

    /// Resume a session persisted by a previous run, if it is still usable.
    pub async fn resume(&self) -> SessionState {
        let inner = &self.inner;
        if inner.state() != SessionState::LoggedOut {
            return inner.state();
        }
        let Some(user) = inner.tokens.load() else {
            return SessionState::LoggedOut;
        };

        let elapsed = inner.activity.elapsed_persisted();
        if elapsed.is_some_and(|e| e >= inner.config.inactivity_timeout()) {
            info!("stored session idle past the inactivity timeout, discarding");
            inner.clear_local();
            return SessionState::LoggedOut;
        }
        if !inner.transition_from(
            |s| s == SessionState::LoggedOut,
            SessionState::Authenticating,
            TransitionCause::Resumed,
        ) {
            return inner.state();
        }
        match inner.activity.last_activity() {
            Some(last) => inner.activity.restore(last),
            None => {
                inner.activity.touch();
            }
        }

        if !inner.tokens.is_access_token_fresh(&user.tokens) {
            debug!("stored access token is stale, refreshing before resume");
            let ok = match inner.refresher.refresh().await {
                RefreshOutcome::Refreshed(_) => true,
                RefreshOutcome::Busy => {
                    inner.refresher.settled().await;
                    inner.tokens.get().is_some()
                }
                RefreshOutcome::Failed(_) => false,
            };
            if !ok {
                inner.clear_local();
                inner.transition_from(
                    |s| s == SessionState::Authenticating,
                    SessionState::LoggedOut,
                    TransitionCause::RefreshFailed,
                );
                return SessionState::LoggedOut;
            }
        }

        if inner.transition_from(
            |s| s == SessionState::Authenticating,
            SessionState::Active,
            TransitionCause::Resumed,
        ) {
            Inner::arm(inner);
            info!(user = user.username().unwrap_or("-"), "session resumed");
        }
        inner.state()
    }

    /// Record a user interaction. Ignored unless the session is `Active`.
    ///
    /// Interactions behind the open warning prompt do not count; only the
    /// user's answer to the prompt keeps the session.
    pub fn record_activity(&self, kind: ActivityKind) {
        if self.state() == SessionState::Active {
            let at = self.inner.activity.touch();
            debug!(?kind, at, "activity");
        }
    }

    /// React to the hosting view becoming visible or hidden.
    ///
    /// Timers may have been suspended while hidden, so deadlines are
    /// re-checked against the persisted last activity.
    pub async fn set_visibility(&self, visibility: Visibility) {
        let inner = &self.inner;
        if visibility == Visibility::Hidden || inner.state() != SessionState::Active {
            return;
        }
        let Some(elapsed) = inner.activity.elapsed_persisted() else {
            return;
        };
        if elapsed >= inner.config.inactivity_timeout() {
            info!(idle_ms = elapsed.as_millis() as u64, "view visible after inactivity timeout");
            inner.expire(TransitionCause::HiddenTooLong).await;
        } else if elapsed >= inner.config.warning_after() {
            debug!(idle_ms = elapsed.as_millis() as u64, "view visible inside warning window");
            inner.recheck.notify_one();
        } else {
            Inner::spawn_validation_heartbeat(inner);
        }
    }

    /// End the session on the user's request.
    ///
    /// Concurrent calls collapse into the first; the backend is told on a
    /// best-effort basis and local state is cleared regardless.
    pub async fn logout(&self) {
        let inner = &self.inner;
        if !inner.gate.try_begin() {
            debug!("logout already in progress");
            return;
        }
        inner.disarm();

        if let Some(pair) = inner.tokens.get() {
            if let Err(e) = inner.backend.logout(&pair.access_token).await {
                debug!(err = %e, "backend logout failed, clearing local session anyway");
            }
            inner.clear_local();
        }
        inner.transition_from(
            |s| s != SessionState::LoggedOut,
            SessionState::LoggedOut,
            TransitionCause::UserLogout,
        );
        inner.gate.end();
        info!("logged out");
    }

    /// Cancel every timer permanently. The manager is inert afterwards.
    pub fn dispose(&self) {
        self.inner.root.cancel();
        self.inner.disarm();
    }

    /// Token that is cancelled by [`dispose`](Self::dispose).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.root.clone()
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Move to `next` iff `allowed(current)`; publishes the transition.
    fn transition_from(
        &self,
        allowed: impl Fn(SessionState) -> bool,
        next: SessionState,
        cause: TransitionCause,
    ) -> bool {
        self.transition_seq(allowed, next, cause).is_some()
    }

    /// Like [`transition_from`](Self::transition_from), returning the
    /// sequence number the machine holds afterwards.
    fn transition_seq(
        &self,
        allowed: impl Fn(SessionState) -> bool,
        next: SessionState,
        cause: TransitionCause,
    ) -> Option<u64> {
        let mut machine = self.machine.lock();
        if !allowed(machine.state) {
            return None;
        }
        Some(self.apply(&mut machine, next, cause))
    }

    /// Move to `next` only if nothing has transitioned since `seq`.
    fn transition_since(&self, seq: u64, next: SessionState, cause: TransitionCause) -> bool {
        let mut machine = self.machine.lock();
        if machine.seq != seq {
            return false;
        }
        self.apply(&mut machine, next, cause);
        true
    }

    fn seq(&self) -> u64 {
        self.machine.lock().seq
    }

    fn apply(&self, machine: &mut Machine, next: SessionState, cause: TransitionCause) -> u64 {
        let prev = machine.state;
        if prev == next {
            return machine.seq;
        }
        machine.state = next;
        machine.seq += 1;
        let event = StateTransition { prev, next, seq: machine.seq, cause };
        self.state_tx.send_replace(next);
        info!(%prev, %next, ?cause, seq = event.seq, "session transition");
        // Published under the machine lock so listeners see transitions in order.
        self.listeners.publish(&event);
        machine.seq
    }

    /// Start the timer tasks for a freshly live session.
    fn arm(this: &Arc<Self>) {
        let cancel = this.root.child_token();
        if let Some(previous) = this.timers.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        let events = this.refresher.subscribe();
        tokio::spawn(Arc::clone(this).inactivity_loop(cancel.clone()));
        tokio::spawn(Arc::clone(this).refresh_loop(cancel.clone()));
        tokio::spawn(Arc::clone(this).heartbeat_loop(cancel.clone()));
        tokio::spawn(Arc::clone(this).refresh_event_loop(events, cancel));
    }

    fn disarm(&self) {
        if let Some(cancel) = self.timers.lock().take() {
            cancel.cancel();
        }
    }

    fn timers_token(&self) -> Option<CancellationToken> {
        self.timers.lock().clone()
    }

    /// Wipe tokens, activity and durable storage.
    fn clear_local(&self) {
        self.tokens.clear();
        self.activity.reset();
        if let Err(e) = self.storage.clear() {
            warn!(err = %e, "failed to clear session storage");
        }
    }

    /// Live → Expired → (notice acknowledged) → LoggedOut.
    async fn expire(&self, cause: TransitionCause) {
        if self.gate.is_active() {
            return;
        }
        if !self.transition_from(|s| s.is_live(), SessionState::Expired, cause) {
            return;
        }
        warn!(?cause, "session expired");
        self.disarm();
        self.clear_local();
        self.alerts.notify_expired().await;
        self.transition_from(
            |s| s == SessionState::Expired,
            SessionState::LoggedOut,
            TransitionCause::ExpiryAcknowledged,
        );
    }

    async fn inactivity_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut activity_rx = self.activity.subscribe();
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let last = match self.activity.last_activity() {
                Some(last) => last,
                None => self.activity.touch(),
            };
            let deadlines = Deadlines::from_last_activity(last, &self.config);
            let now = self.activity.now_ms();

            if now >= deadlines.expire_at {
                self.expire(TransitionCause::HardTimeout).await;
                return;
            }
            let active = self.state() == SessionState::Active;
            if active && now >= deadlines.warning_at {
                let remaining = Duration::from_millis(deadlines.expire_at - now);
                if !self.run_warning(deadlines, remaining, &cancel).await {
                    return;
                }
                continue;
            }

            let wake = if active { deadlines.warning_at } else { deadlines.expire_at };
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(wake - now)) => {}
                changed = activity_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.recheck.notified() => {}
            }
        }
    }

    /// Prompt the user. Returns whether the session is still live afterwards.
    ///
    /// The countdown is fixed when the prompt opens: only the answer keeps
    /// the session, so it hard-expires at `deadlines.expire_at` even if
    /// requests touched the activity clock meanwhile.
    async fn run_warning(
        &self,
        deadlines: Deadlines,
        remaining: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if !self.transition_from(
            |s| s == SessionState::Active,
            SessionState::WarningPrompted,
            TransitionCause::WarningShown,
        ) {
            return self.state().is_live();
        }

        *self.prompt.lock() = Some(deadlines);
        let answer = tokio::select! {
            _ = cancel.cancelled() => None,
            answer = tokio::time::timeout(remaining, self.alerts.warn_and_await_choice(remaining)) => Some(answer),
        };
        *self.prompt.lock() = None;
        let Some(answer) = answer else {
            return false;
        };
        let choice = match answer {
            Ok(choice) => choice,
            Err(_) => {
                info!("warning countdown elapsed unanswered");
                self.expire(TransitionCause::HardTimeout).await;
                return false;
            }
        };
        if choice == WarningChoice::END {
            info!("user chose to end the session");
            self.expire(TransitionCause::Declined).await;
            return false;
        }

        if !self.transition_from(
            |s| s == SessionState::WarningPrompted,
            SessionState::Refreshing,
            TransitionCause::ContinueChosen,
        ) {
            return self.state().is_live();
        }
        match self.refresher.refresh().await {
            RefreshOutcome::Refreshed(_) | RefreshOutcome::Busy => {
                self.activity.touch();
                self.transition_from(
                    |s| s == SessionState::Refreshing,
                    SessionState::Active,
                    TransitionCause::Refreshed,
                );
                self.state().is_live()
            }
            RefreshOutcome::Failed(_) => {
                self.expire(TransitionCause::RefreshFailed).await;
                false
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.token_refresh_interval();
        let idle_threshold = self.config.background_refresh_idle();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = timer.tick() => {}
            }
            if self.state() != SessionState::Active {
                continue;
            }
            let idle = self.activity.elapsed().unwrap_or_default();
            if idle <= idle_threshold {
                debug!(idle_ms = idle.as_millis() as u64, "user recently active, skipping background refresh");
                continue;
            }
            match self.refresher.refresh().await {
                RefreshOutcome::Refreshed(_) => debug!("background refresh done"),
                RefreshOutcome::Busy => debug!("background refresh skipped, another in flight"),
                RefreshOutcome::Failed(e) => {
                    warn!(err = %e, "background refresh failed");
                    self.expire(TransitionCause::RefreshFailed).await;
                    return;
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = HeartbeatBackoff::new(self.config.heartbeat_backoff_max());
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = timer.tick() => {}
            }
            if self.state() != SessionState::Active {
                continue;
            }
            if !self.beat(&mut backoff, &mut failures, &cancel).await {
                return;
            }
        }
    }

    /// One heartbeat round. Returns false once the session is gone.
    async fn beat(
        &self,
        backoff: &mut HeartbeatBackoff,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(token) = self.tokens.access_token() else {
            return false;
        };
        match pulse(self.backend.as_ref(), &token, backoff, cancel).await {
            Pulse::Alive => {
                *failures = 0;
                true
            }
            Pulse::Cancelled => false,
            Pulse::Unauthorized => {
                debug!("heartbeat unauthorized, refreshing");
                match self.refresher.refresh().await {
                    RefreshOutcome::Refreshed(_) | RefreshOutcome::Busy => true,
                    RefreshOutcome::Failed(_) => {
                        self.expire(TransitionCause::RefreshFailed).await;
                        false
                    }
                }
            }
            Pulse::Failed(SessionError::NetworkUnavailable(_)) => {
                *failures += 1;
                let max = self.config.max_heartbeat_failures;
                if max > 0 && *failures >= max {
                    warn!(failures = *failures, "backend unreachable, expiring session");
                    self.expire(TransitionCause::HeartbeatFailed).await;
                    return false;
                }
                true
            }
            Pulse::Failed(_) => true,
        }
    }

    /// One heartbeat to validate the token after the view became visible.
    fn spawn_validation_heartbeat(this: &Arc<Self>) {
        let Some(cancel) = this.timers_token() else {
            return;
        };
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            let mut backoff = HeartbeatBackoff::new(inner.config.heartbeat_backoff_max());
            let mut failures = 0u32;
            inner.beat(&mut backoff, &mut failures, &cancel).await;
        });
    }

    async fn refresh_event_loop(
        self: Arc<Self>,
        mut events: broadcast::Receiver<RefreshEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(RefreshEvent::Failed { error }) => {
                    warn!(err = %error, "refresh failed, expiring session");
                    self.expire(TransitionCause::RefreshFailed).await;
                    return;
                }
                Ok(RefreshEvent::Refreshed) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
