// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use sluice_session::SessionConfig;

/// Exit code used when the session expired and the user must sign in again.
pub const EXIT_SESSION_EXPIRED: i32 = 3;

/// Interactive console over an authenticated API session.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
pub struct Config {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Login name. Prompted for on the terminal when absent.
    #[arg(long, env = "SLUICE_USERNAME")]
    pub username: Option<String>,

    /// Login password. Prompted for on the terminal when absent.
    #[arg(long, env = "SLUICE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Session state file (defaults to the XDG state directory).
    #[arg(long, env = "SLUICE_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "SLUICE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level.
    #[arg(long, env = "SLUICE_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        Ok(())
    }

    /// Where the durable session record lives.
    pub fn state_path(&self) -> PathBuf {
        match self.state_file {
            Some(ref path) => path.clone(),
            None => state_dir().join("session.json"),
        }
    }
}

/// Resolve the state directory.
///
/// Checks `$XDG_STATE_HOME/sluice`, then `$HOME/.local/state/sluice`.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("sluice");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/sluice");
    }
    PathBuf::from(".sluice")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
