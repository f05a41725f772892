// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_support::{MockBackend, TestClock};

#[test]
fn backoff_doubles_caps_and_resets() {
    let mut backoff = HeartbeatBackoff::new(Duration::from_secs(5));
    let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 5, 5]);

    backoff.reset();
    assert_eq!(backoff.current(), INITIAL_BACKOFF);
}

#[test]
fn backoff_max_below_initial_is_raised() {
    let mut backoff = HeartbeatBackoff::new(Duration::from_millis(10));
    assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_heartbeat_backs_off_then_succeeds() {
    let backend = MockBackend::new(Arc::new(TestClock::new()));
    for _ in 0..3 {
        backend.push_heartbeat(Err(SessionError::RateLimited));
    }
    let mut backoff = HeartbeatBackoff::new(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    assert_eq!(pulse(&backend, "a1", &mut backoff, &cancel).await, Pulse::Alive);

    let times = backend.heartbeat_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(backoff.current(), INITIAL_BACKOFF);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_backoff() {
    let backend = MockBackend::new(Arc::new(TestClock::new()));
    backend.push_heartbeat(Err(SessionError::RateLimited));
    let mut backoff = HeartbeatBackoff::new(Duration::from_secs(60));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(pulse(&backend, "a1", &mut backoff, &cancel).await, Pulse::Cancelled);
    assert_eq!(backend.heartbeat_calls(), 1);
}

#[yare::parameterized(
    unauthorized = { SessionError::Unauthorized, Pulse::Unauthorized },
    offline = {
        SessionError::NetworkUnavailable("refused".into()),
        Pulse::Failed(SessionError::NetworkUnavailable("refused".into()))
    },
    server = {
        SessionError::ServerError { status: 500, message: String::new() },
        Pulse::Failed(SessionError::ServerError { status: 500, message: String::new() })
    },
)]
#[test_macro(tokio::test)]
async fn definitive_answers_end_the_round(error: SessionError, expected: Pulse) {
    let backend = MockBackend::new(Arc::new(TestClock::new()));
    backend.push_heartbeat(Err(error));
    let mut backoff = HeartbeatBackoff::new(Duration::from_secs(60));

    assert_eq!(pulse(&backend, "a1", &mut backoff, &CancellationToken::new()).await, expected);
    assert_eq!(backend.heartbeat_calls(), 1);
}
