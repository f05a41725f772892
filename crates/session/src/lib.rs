// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client session lifecycle: activity tracking, token refresh, heartbeat,
//! user prompts, and the authenticated HTTP boundary.
//!
//! [`AuthFacade`] is the only type the rest of an application needs. It owns
//! a [`SessionLifecycleManager`] and hands out an [`ApiClient`] whose requests
//! carry the current access token and survive a token rotation.

pub mod activity;
pub mod alert;
pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod heartbeat;
pub mod http;
pub mod manager;
pub mod refresher;
pub mod state;
pub mod storage;
pub mod test_support;
pub mod token;

pub use alert::{AlertGateway, WarningChoice};
pub use backend::{AuthBackend, HttpBackend};
pub use clock::{Clock, SystemClock};
pub use config::SessionConfig;
pub use error::SessionError;
pub use facade::{AuthFacade, AuthFacadeBuilder, Subscription};
pub use http::{ApiClient, ApiRequest};
pub use manager::SessionLifecycleManager;
pub use refresher::{RefreshEvent, RefreshOutcome};
pub use state::{
    ActivityKind, Deadlines, SessionState, StateTransition, TransitionCause, Visibility,
};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use token::{StoredUser, TokenPair, UserIdentity};

/// Install the process-wide rustls crypto provider (idempotent).
///
/// reqwest is built without a bundled provider, so every HTTP client
/// constructor calls this first.
pub fn install_crypto_provider() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
