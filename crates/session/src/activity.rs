// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Last-activity tracking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::clock::Clock;
use crate::storage::{Storage, LAST_ACTIVITY_KEY};

/// Records when the user last interacted and how long ago that was.
///
/// The in-memory value never moves backwards. Every advance is published on a
/// watch channel so the inactivity timer can re-arm before it fires.
pub struct ActivityClock {
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage>,
    /// Epoch ms of the last touch; 0 when nothing is known in memory.
    last: watch::Sender<u64>,
}

impl ActivityClock {
    pub fn new(clock: Arc<dyn Clock>, storage: Arc<dyn Storage>) -> Self {
        let (last, _) = watch::channel(0);
        Self { clock, storage, last }
    }

    /// Record "now" as the last activity and persist it. Returns the stored value.
    pub fn touch(&self) -> u64 {
        let now = self.clock.now_ms();
        let mut stamped = now;
        self.last.send_if_modified(|last| {
            if now > *last {
                *last = now;
                true
            } else {
                stamped = *last;
                false
            }
        });
        self.persist(stamped);
        stamped
    }

    /// Seed the in-memory value from a persisted timestamp without persisting.
    pub fn restore(&self, last_activity_ms: u64) {
        self.last.send_if_modified(|last| {
            if last_activity_ms > *last {
                *last = last_activity_ms;
                true
            } else {
                false
            }
        });
    }

    /// Forget the in-memory timestamp (storage is cleared by the caller).
    pub fn reset(&self) {
        self.last.send_replace(0);
    }

    /// Last activity in epoch ms, falling back to the persisted value.
    pub fn last_activity(&self) -> Option<u64> {
        match *self.last.borrow() {
            0 => self.persisted(),
            ms => Some(ms),
        }
    }

    /// Time since the last activity, or `None` if none was ever recorded.
    pub fn elapsed(&self) -> Option<Duration> {
        let last = self.last_activity()?;
        Some(Duration::from_millis(self.clock.now_ms().saturating_sub(last)))
    }

    /// Time since the last activity as recorded in durable storage.
    ///
    /// Used after the view was hidden, when in-memory timers may have been
    /// suspended; whichever of memory and storage is newer wins.
    pub fn elapsed_persisted(&self) -> Option<Duration> {
        let memory = *self.last.borrow();
        let last = match self.persisted() {
            Some(stored) => stored.max(memory),
            None if memory > 0 => memory,
            None => return None,
        };
        Some(Duration::from_millis(self.clock.now_ms().saturating_sub(last)))
    }

    /// Watch every advance of the in-memory timestamp.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.last.subscribe()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn persisted(&self) -> Option<u64> {
        self.storage.get(LAST_ACTIVITY_KEY)?.trim().parse().ok()
    }

    fn persist(&self, ms: u64) {
        if let Err(e) = self.storage.set(LAST_ACTIVITY_KEY, &ms.to_string()) {
            warn!(err = %e, "failed to persist last activity");
        }
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
