// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::*;
use crate::storage::MemoryStorage;
use crate::test_support::{TestClock, TEST_EPOCH_MS};

fn fixture() -> (ActivityClock, Arc<TestClock>, Arc<MemoryStorage>) {
    let clock = Arc::new(TestClock::new());
    let storage = Arc::new(MemoryStorage::new());
    let activity = ActivityClock::new(clock.clone(), storage.clone());
    (activity, clock, storage)
}

#[tokio::test(start_paused = true)]
async fn touch_persists_and_reports_elapsed() {
    let (activity, _clock, storage) = fixture();
    assert_eq!(activity.last_activity(), None);
    assert_eq!(activity.elapsed(), None);

    let at = activity.touch();
    assert_eq!(storage.get(LAST_ACTIVITY_KEY), Some(at.to_string()));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(activity.elapsed(), Some(Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn touch_notifies_subscribers() {
    let (activity, _clock, _storage) = fixture();
    let mut rx = activity.subscribe();
    tokio::time::advance(Duration::from_millis(10)).await;
    let at = activity.touch();
    assert!(rx.has_changed().unwrap_or(false));
    assert_eq!(*rx.borrow_and_update(), at);
}

#[tokio::test(start_paused = true)]
async fn last_activity_falls_back_to_storage() -> anyhow::Result<()> {
    let (activity, _clock, storage) = fixture();
    storage.set(LAST_ACTIVITY_KEY, &(TEST_EPOCH_MS - 1_000).to_string())?;
    assert_eq!(activity.last_activity(), Some(TEST_EPOCH_MS - 1_000));

    storage.set(LAST_ACTIVITY_KEY, "not a number")?;
    assert_eq!(activity.last_activity(), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn elapsed_persisted_prefers_newer_value() -> anyhow::Result<()> {
    let (activity, clock, storage) = fixture();
    activity.touch();
    clock.skip(Duration::from_secs(30));
    // Another holder of the store recorded activity 10s ago.
    storage.set(LAST_ACTIVITY_KEY, &(clock.now_ms() - 10_000).to_string())?;

    assert_eq!(activity.elapsed(), Some(Duration::from_secs(30)));
    assert_eq!(activity.elapsed_persisted(), Some(Duration::from_secs(10)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_forgets_memory_and_restore_does_not_persist() {
    let (activity, _clock, storage) = fixture();
    activity.restore(TEST_EPOCH_MS - 500);
    assert_eq!(activity.last_activity(), Some(TEST_EPOCH_MS - 500));
    assert_eq!(storage.get(LAST_ACTIVITY_KEY), None);

    activity.reset();
    assert_eq!(activity.last_activity(), None);
}

proptest! {
    #[test]
    fn last_activity_never_moves_backwards(offsets in proptest::collection::vec(0u64..10_000, 1..20)) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(TestClock::new());
        let activity = ActivityClock::new(clock, storage);
        let mut high = 0;
        for offset in offsets {
            activity.restore(TEST_EPOCH_MS - offset);
            high = high.max(TEST_EPOCH_MS - offset);
            prop_assert_eq!(activity.last_activity(), Some(high));
        }
    }
}
