// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Lifecycle state of the single client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Active,
    Refreshing,
    WarningPrompted,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::WarningPrompted => "warning_prompted",
            Self::Expired => "expired",
        }
    }

    /// States in which the session timers are armed.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Refreshing | Self::WarningPrompted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Login,
    LoginFailed,
    Resumed,
    WarningShown,
    ContinueChosen,
    Refreshed,
    Declined,
    HardTimeout,
    RefreshFailed,
    HeartbeatFailed,
    HiddenTooLong,
    UserLogout,
    /// The user acknowledged the expiry notice; the application should
    /// leave the authenticated view.
    ExpiryAcknowledged,
}

/// Payload delivered to subscribers on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub prev: SessionState,
    pub next: SessionState,
    pub seq: u64,
    pub cause: TransitionCause,
}

impl StateTransition {
    /// True when the application should redirect to an unauthenticated view.
    pub fn is_redirect(&self) -> bool {
        self.next == SessionState::LoggedOut && self.cause == TransitionCause::ExpiryAcknowledged
    }
}

/// User interactions that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MouseDown,
    MouseMove,
    KeyDown,
    TouchStart,
    Scroll,
    Click,
    HttpRequest,
}

/// Visibility of the hosting view (browser tab, terminal focus, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Inactivity deadlines derived from one lastActivity timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Epoch ms at which the warning prompt is due.
    pub warning_at: u64,
    /// Epoch ms at which the session hard-expires.
    pub expire_at: u64,
}

impl Deadlines {
    pub fn from_last_activity(last_activity_ms: u64, config: &SessionConfig) -> Self {
        Self {
            warning_at: last_activity_ms.saturating_add(config.warning_after().as_millis() as u64),
            expire_at: last_activity_ms.saturating_add(config.inactivity_timeout_ms),
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
