// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The two user-facing session prompts.
//!
//! Rendering is the application's business; the manager only awaits the
//! answers. Implementations must not block the executor while waiting.

use std::time::Duration;

use async_trait::async_trait;

/// Answer to the "session about to expire" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningChoice {
    pub continue_session: bool,
}

impl WarningChoice {
    pub const CONTINUE: Self = Self { continue_session: true };
    pub const END: Self = Self { continue_session: false };
}

#[async_trait]
pub trait AlertGateway: Send + Sync {
    /// Show a countdown of `remaining` and wait for the user's choice.
    ///
    /// Resolve to [`WarningChoice::END`] when the user declines. The manager
    /// also bounds the wait by `remaining`, so an implementation may simply
    /// never resolve when nobody answers.
    async fn warn_and_await_choice(&self, remaining: Duration) -> WarningChoice;

    /// Show the terminal "session expired" notice; resolve once acknowledged.
    async fn notify_expired(&self);
}
