// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn defaults_parse_and_validate() -> anyhow::Result<()> {
    let config = Config::try_parse_from(["sluice"])?;
    config.validate()?;
    assert_eq!(config.log_format, "text");
    assert_eq!(config.session.api_url, "http://127.0.0.1:8000");
    assert!(config.state_path().ends_with("session.json"));
    Ok(())
}

#[test]
fn explicit_state_file_wins() -> anyhow::Result<()> {
    let config = Config::try_parse_from(["sluice", "--state-file", "/tmp/s.json"])?;
    assert_eq!(config.state_path(), PathBuf::from("/tmp/s.json"));
    Ok(())
}

#[test]
fn session_flags_are_flattened() -> anyhow::Result<()> {
    let config = Config::try_parse_from([
        "sluice",
        "--api-url",
        "https://api.example.com",
        "--warning-timeout-ms",
        "1000",
        "--username",
        "ada",
    ])?;
    assert_eq!(config.session.base_url(), "https://api.example.com");
    assert_eq!(config.session.warning_timeout_ms, 1000);
    assert_eq!(config.username.as_deref(), Some("ada"));
    Ok(())
}

#[yare::parameterized(
    bad_format = { &["sluice", "--log-format", "xml"], "invalid log format" },
    warning_too_long = {
        &["sluice", "--inactivity-timeout-ms", "1000", "--warning-timeout-ms", "1000"],
        "must be shorter"
    },
)]
fn invalid_configs(args: &[&str], expected: &str) {
    let config = Config::try_parse_from(args).expect("parse");
    let err = config.validate().expect_err("should be rejected");
    assert!(err.to_string().contains(expected), "got: {err}");
}
