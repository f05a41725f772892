// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::storage::{MemoryStorage, Storage};
use crate::test_support::{make_token, stored_user, token_pair, TestClock, TestStorage, TEST_EPOCH_MS};

fn store_with(storage: Arc<dyn Storage>) -> TokenStore {
    TokenStore::new(storage, Arc::new(TestClock::new()), Duration::from_secs(60))
}

#[yare::parameterized(
    millis_number = { json!(1_700_000_000_000u64), Some(1_700_000_000_000) },
    seconds_number = { json!(1_700_000_000u64), Some(1_700_000_000_000) },
    fractional_seconds = { json!(1_700_000_000.5), Some(1_700_000_000_500) },
    millis_string = { json!("1700000000000"), Some(1_700_000_000_000) },
    seconds_string = { json!(" 1700000000 "), Some(1_700_000_000_000) },
    garbage_string = { json!("yesterday"), None },
    negative = { json!(-5), None },
    object = { json!({"at": 1}), None },
)]
fn created_at_is_normalised_to_millis(raw: serde_json::Value, expected: Option<u64>) {
    assert_eq!(access_token_created_at_ms(&make_token(raw)), expected);
}

#[test]
fn iat_is_used_when_created_at_is_missing() {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "iat": 1_700_000_000u64 }).to_string());
    let token = format!("h.{payload}.s");
    assert_eq!(access_token_created_at_ms(&token), Some(1_700_000_000_000));
}

#[yare::parameterized(
    opaque = { "opaque-token" },
    bad_base64 = { "a.%%%.c" },
    not_json = { "a.bm90IGpzb24.c" },
    empty = { "" },
)]
fn undecodable_tokens_have_no_created_at(token: &str) {
    assert_eq!(access_token_created_at_ms(token), None);
}

#[tokio::test(start_paused = true)]
async fn freshness_follows_grace_window() {
    let store = store_with(Arc::new(MemoryStorage::new()));
    let now = TEST_EPOCH_MS;
    assert!(store.is_access_token_fresh(&token_pair(now - 59_000, "a")));
    assert!(!store.is_access_token_fresh(&token_pair(now - 60_000, "b")));
    assert!(!store.is_access_token_fresh(&TokenPair::new("opaque", "r")));
}

#[test]
fn set_persists_and_bumps_generation() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_with(storage.clone());
    let g0 = store.generation();

    let g1 = store.set(stored_user("ada", TEST_EPOCH_MS))?;
    assert!(g1 > g0);
    assert_eq!(store.user().and_then(|u| u.username().map(str::to_owned)), Some("ada".into()));

    let raw = storage.get(USER_KEY).unwrap_or_default();
    let record: serde_json::Value = serde_json::from_str(&raw)?;
    assert!(record["access_token"].is_string());
    assert_eq!(record["refresh_token"], "refresh-login");
    assert_eq!(record["username"], "ada");
    Ok(())
}

#[test]
fn incomplete_pair_is_refused() {
    let store = store_with(Arc::new(MemoryStorage::new()));
    let user = StoredUser::new(TokenPair::new("access", ""), Default::default());
    crate::assert_err_contains!(store.set(user), "incomplete token pair");
    assert!(store.get().is_none());
}

#[test]
fn failed_write_leaves_memory_untouched() -> anyhow::Result<()> {
    let storage = Arc::new(TestStorage::new());
    let store = store_with(storage.clone());
    let generation = store.set(stored_user("ada", TEST_EPOCH_MS))?;
    let before = store.get();

    storage.fail_writes(true);
    assert!(store.replace_if(generation, token_pair(TEST_EPOCH_MS, "next")).is_err());
    assert_eq!(store.get(), before);
    assert_eq!(store.generation(), generation);
    Ok(())
}

#[test]
fn replace_if_keeps_profile_and_rejects_stale_generation() -> anyhow::Result<()> {
    let store = store_with(Arc::new(MemoryStorage::new()));
    let generation = store.set(stored_user("ada", TEST_EPOCH_MS))?;

    assert!(store.replace_if(generation, token_pair(TEST_EPOCH_MS, "two"))?);
    assert_eq!(store.get().map(|p| p.refresh_token), Some("refresh-two".into()));
    assert_eq!(store.user().and_then(|u| u.username().map(str::to_owned)), Some("ada".into()));

    store.clear();
    assert!(!store.replace_if(generation, token_pair(TEST_EPOCH_MS, "late"))?);
    assert!(store.get().is_none());
    Ok(())
}

#[test]
fn clear_if_only_clears_matching_generation() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_with(storage.clone());
    let first = store.set(stored_user("ada", TEST_EPOCH_MS))?;
    let second = store.set(stored_user("bob", TEST_EPOCH_MS))?;

    assert!(!store.clear_if(first));
    assert!(store.get().is_some());
    assert!(store.clear_if(second));
    assert!(store.get().is_none());
    assert_eq!(storage.get(USER_KEY), None);
    Ok(())
}

#[test]
fn load_reads_valid_record_and_drops_malformed_one() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(USER_KEY, &serde_json::to_string(&stored_user("ada", TEST_EPOCH_MS))?)?;

    let store = store_with(storage.clone());
    let loaded = store.load();
    assert_eq!(loaded.as_ref().and_then(|u| u.username()), Some("ada"));
    assert!(store.generation() > 0);

    storage.set(USER_KEY, r#"{"access_token":"only-half"}"#)?;
    let store = store_with(storage.clone());
    assert!(store.load().is_none());
    assert_eq!(storage.get(USER_KEY), None);
    Ok(())
}

#[test]
fn debug_output_redacts_tokens() {
    let pair = TokenPair::new("secret-access-token", "secret-refresh-token");
    let rendered = format!("{pair:?}");
    assert!(!rendered.contains("secret-access-token"));
    assert!(!rendered.contains("secret-refresh-token"));
}
