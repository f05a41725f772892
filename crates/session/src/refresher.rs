// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! Callers that arrive while a refresh is running are turned away with
//! [`RefreshOutcome::Busy`] instead of queueing a second network call. Every
//! failure is final for the session: the store is cleared and a
//! [`RefreshEvent::Failed`] is broadcast so the lifecycle manager can expire.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::clock::Clock;
use crate::error::SessionError;
use crate::http::LogoutGate;
use crate::token::{TokenPair, TokenStore};

/// Result of one [`TokenRefresher::refresh`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New pair stored and returned.
    Refreshed(TokenPair),
    /// Another refresh was already in flight; nothing was sent.
    Busy,
    /// The exchange failed (or its session ended while it ran).
    Failed(SessionError),
}

/// Broadcast after every refresh that belonged to the current session.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    Refreshed,
    Failed { error: SessionError },
}

pub struct TokenRefresher {
    backend: Arc<dyn AuthBackend>,
    tokens: Arc<TokenStore>,
    clock: Arc<dyn Clock>,
    gate: Arc<LogoutGate>,
    in_flight: watch::Sender<bool>,
    event_tx: broadcast::Sender<RefreshEvent>,
}

/// Clears the in-flight flag even if the refreshing future is dropped.
struct InFlight<'a>(&'a watch::Sender<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl TokenRefresher {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        tokens: Arc<TokenStore>,
        clock: Arc<dyn Clock>,
        gate: Arc<LogoutGate>,
    ) -> Self {
        let (in_flight, _) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(16);
        Self { backend, tokens, clock, gate, in_flight, event_tx }
    }

    /// Exchange the current refresh token for a new pair.
    ///
    /// Nothing is sent while a logout is running; the caller gets
    /// `Failed(LoggingOut)` and the session is left for the logout to clear.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.gate.is_active() {
            debug!("logout in progress, not refreshing");
            return RefreshOutcome::Failed(SessionError::LoggingOut);
        }
        let acquired = self.in_flight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !acquired {
            debug!("refresh already in flight, turning caller away");
            return RefreshOutcome::Busy;
        }
        let _in_flight = InFlight(&self.in_flight);

        let generation = self.tokens.generation();
        let Some(pair) = self.tokens.get() else {
            return RefreshOutcome::Failed(SessionError::NotAuthenticated);
        };

        match self.backend.refresh(&pair.refresh_token, self.clock.now_ms()).await {
            Ok(next) => match self.tokens.replace_if(generation, next.clone()) {
                Ok(true) => {
                    info!("access token refreshed");
                    let _ = self.event_tx.send(RefreshEvent::Refreshed);
                    RefreshOutcome::Refreshed(next)
                }
                Ok(false) => {
                    debug!("session ended while refreshing, discarding new tokens");
                    RefreshOutcome::Failed(SessionError::NotAuthenticated)
                }
                Err(e) => self.fail(generation, e),
            },
            Err(e) => self.fail(generation, e),
        }
    }

    fn fail(&self, generation: u64, error: SessionError) -> RefreshOutcome {
        if self.tokens.clear_if(generation) {
            warn!(err = %error, "token refresh failed, session cleared");
            let _ = self.event_tx.send(RefreshEvent::Failed { error: error.clone() });
        } else {
            debug!(err = %error, "stale refresh failed after session ended");
        }
        RefreshOutcome::Failed(error)
    }

    pub fn is_in_flight(&self) -> bool {
        *self.in_flight.borrow()
    }

    /// Wait until no refresh is in flight.
    pub async fn settled(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Subscribe to refresh events.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "refresher_tests.rs"]
mod tests;
