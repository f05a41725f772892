// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn memory_storage_roundtrip_and_clear() -> anyhow::Result<()> {
    let store = MemoryStorage::new();
    assert!(store.is_empty());
    store.set(USER_KEY, "{}")?;
    store.set(LAST_ACTIVITY_KEY, "42")?;
    assert_eq!(store.get(LAST_ACTIVITY_KEY).as_deref(), Some("42"));
    assert_eq!(store.len(), 2);

    store.remove(USER_KEY)?;
    assert_eq!(store.get(USER_KEY), None);

    store.clear()?;
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn file_storage_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/session.json");

    let store = FileStorage::open(&path);
    store.set(LAST_ACTIVITY_KEY, "1700000000000")?;
    store.set(USER_KEY, r#"{"access_token":"a","refresh_token":"r"}"#)?;
    drop(store);

    let reopened = FileStorage::open(&path);
    assert_eq!(reopened.get(LAST_ACTIVITY_KEY).as_deref(), Some("1700000000000"));
    assert!(reopened.get(USER_KEY).is_some());

    reopened.clear()?;
    let wiped = FileStorage::open(&path);
    assert_eq!(wiped.get(USER_KEY), None);
    Ok(())
}

#[test]
fn file_storage_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let store = FileStorage::open(&path);
    for i in 0..5 {
        store.set(LAST_ACTIVITY_KEY, &i.to_string())?;
    }
    let names: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["session.json".to_owned()]);
    Ok(())
}

#[test]
fn corrupt_file_opens_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json")?;
    let store = FileStorage::open(&path);
    assert_eq!(store.get(USER_KEY), None);
    Ok(())
}
