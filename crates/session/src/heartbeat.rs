// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness ping with exponential backoff on rate limiting.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::AuthBackend;
use crate::error::SessionError;

/// First delay after a 429.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Doubling backoff, reset on the next success.
#[derive(Debug, Clone)]
pub struct HeartbeatBackoff {
    max: Duration,
    current: Duration,
}

impl HeartbeatBackoff {
    pub fn new(max: Duration) -> Self {
        Self { max: max.max(INITIAL_BACKOFF), current: INITIAL_BACKOFF }
    }

    /// Delay to wait now; the following call returns double (capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }

    /// The delay the next 429 would wait.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Definitive result of one heartbeat round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulse {
    Alive,
    /// Access token rejected; a refresh is needed.
    Unauthorized,
    /// No definitive answer (network or server failure).
    Failed(SessionError),
    /// Teardown happened while backing off.
    Cancelled,
}

/// Send one heartbeat, retrying 429 answers with backoff until the backend
/// gives a definitive answer or `cancel` fires.
pub async fn pulse(
    backend: &dyn AuthBackend,
    access_token: &str,
    backoff: &mut HeartbeatBackoff,
    cancel: &CancellationToken,
) -> Pulse {
    loop {
        match backend.heartbeat(access_token).await {
            Ok(()) => {
                backoff.reset();
                debug!("heartbeat ok");
                return Pulse::Alive;
            }
            Err(SessionError::RateLimited) => {
                let delay = backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "heartbeat rate limited, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Pulse::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(SessionError::Unauthorized) => return Pulse::Unauthorized,
            Err(e) => {
                warn!(err = %e, "heartbeat failed");
                return Pulse::Failed(e);
            }
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
