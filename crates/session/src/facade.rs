// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application-facing entry point.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::DropGuard;

use crate::alert::AlertGateway;
use crate::backend::{AuthBackend, HttpBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::http::ApiClient;
use crate::manager::SessionLifecycleManager;
use crate::state::{ActivityKind, Deadlines, SessionState, StateTransition, Visibility};
use crate::storage::{MemoryStorage, Storage};
use crate::token::UserIdentity;

pub use crate::manager::Subscription;

/// Builder for [`AuthFacade`]. Defaults to the REST backend, in-memory
/// storage and the system clock.
pub struct AuthFacadeBuilder {
    config: SessionConfig,
    backend: Option<Arc<dyn AuthBackend>>,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AuthFacadeBuilder {
    pub fn backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config and wire everything together.
    pub fn build(self, alerts: Arc<dyn AlertGateway>) -> anyhow::Result<AuthFacade> {
        self.config.validate()?;
        let backend = match self.backend {
            Some(b) => b,
            None => Arc::new(HttpBackend::new(&self.config)),
        };
        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let manager = SessionLifecycleManager::new(self.config, backend, alerts, storage, clock);
        let api = ApiClient::new(
            manager.config(),
            Arc::clone(manager.tokens()),
            Arc::clone(manager.activity()),
            Arc::clone(manager.refresher()),
            Arc::clone(manager.logout_gate()),
        );
        let shutdown = manager.shutdown_token().drop_guard();
        Ok(AuthFacade { manager, api, _shutdown: shutdown })
    }
}

/// The whole session layer behind one handle.
///
/// Dropping the facade tears down every timer, same as [`dispose`](Self::dispose).
pub struct AuthFacade {
    manager: SessionLifecycleManager,
    api: ApiClient,
    _shutdown: DropGuard,
}

impl AuthFacade {
    pub fn builder(config: SessionConfig) -> AuthFacadeBuilder {
        AuthFacadeBuilder { config, backend: None, storage: None, clock: None }
    }

    /// Pick up a session persisted by a previous run. Call once at startup.
    pub async fn init(&self) -> SessionState {
        self.manager.resume().await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserIdentity, SessionError> {
        self.manager.login(username, password).await
    }

    /// End the session. Safe to call repeatedly or concurrently.
    pub async fn logout(&self) {
        self.manager.logout().await;
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&StateTransition) + Send + Sync + 'static,
    ) -> Subscription {
        self.manager.subscribe(listener)
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.manager.current_user()
    }

    pub fn record_activity(&self, kind: ActivityKind) {
        self.manager.record_activity(kind);
    }

    pub async fn set_visibility(&self, visibility: Visibility) {
        self.manager.set_visibility(visibility).await;
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.manager.state_watch()
    }

    pub fn deadlines(&self) -> Option<Deadlines> {
        self.manager.deadlines()
    }

    /// Authenticated client for application API calls.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn manager(&self) -> &SessionLifecycleManager {
        &self.manager
    }

    pub fn dispose(&self) {
        self.manager.dispose();
    }
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod tests;
