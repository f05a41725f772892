// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Upper bound for every configured duration, keeping timer arithmetic in range.
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Session lifecycle tuning knobs.
///
/// Every field has a long flag and an environment variable so the struct can
/// be flattened into a binary's parser.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the REST backend.
    #[arg(long, default_value = "http://127.0.0.1:8000", env = "SLUICE_API_URL")]
    pub api_url: String,

    /// Inactivity after which the session hard-expires, in milliseconds.
    #[arg(long, default_value_t = 3_600_000, env = "SLUICE_INACTIVITY_TIMEOUT_MS")]
    pub inactivity_timeout_ms: u64,

    /// Lead time before hard expiry at which the user is prompted.
    #[arg(long, default_value_t = 300_000, env = "SLUICE_WARNING_TIMEOUT_MS")]
    pub warning_timeout_ms: u64,

    /// Cadence of the background token refresh check.
    #[arg(long, default_value_t = 840_000, env = "SLUICE_TOKEN_REFRESH_INTERVAL_MS")]
    pub token_refresh_interval_ms: u64,

    /// Cadence of the liveness ping.
    #[arg(long, default_value_t = 600_000, env = "SLUICE_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// How long after its `created_at` an access token counts as fresh.
    #[arg(long, default_value_t = 60_000, env = "SLUICE_ACCESS_TOKEN_GRACE_MS")]
    pub access_token_grace_ms: u64,

    /// Upper bound for the heartbeat 429 backoff.
    #[arg(long, default_value_t = 60_000, env = "SLUICE_HEARTBEAT_BACKOFF_MAX_MS")]
    pub heartbeat_backoff_max_ms: u64,

    /// Consecutive heartbeat network failures before the session expires (0 disables).
    #[arg(long, default_value_t = 3, env = "SLUICE_MAX_HEARTBEAT_FAILURES")]
    pub max_heartbeat_failures: u32,

    /// Per-request HTTP timeout.
    #[arg(long, default_value_t = 10_000, env = "SLUICE_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".into(),
            inactivity_timeout_ms: 3_600_000,
            warning_timeout_ms: 300_000,
            token_refresh_interval_ms: 840_000,
            heartbeat_interval_ms: 600_000,
            access_token_grace_ms: 60_000,
            heartbeat_backoff_max_ms: 60_000,
            max_heartbeat_failures: 3,
            http_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("inactivity timeout", self.inactivity_timeout_ms),
            ("warning timeout", self.warning_timeout_ms),
            ("token refresh interval", self.token_refresh_interval_ms),
            ("heartbeat interval", self.heartbeat_interval_ms),
            ("heartbeat backoff max", self.heartbeat_backoff_max_ms),
            ("http timeout", self.http_timeout_ms),
        ];
        for (name, ms) in durations {
            if ms == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
            if ms > MAX_DURATION_MS {
                anyhow::bail!("{name} must be at most {MAX_DURATION_MS}ms (one year)");
            }
        }
        if self.warning_timeout_ms >= self.inactivity_timeout_ms {
            anyhow::bail!(
                "warning timeout ({}ms) must be shorter than inactivity timeout ({}ms)",
                self.warning_timeout_ms,
                self.inactivity_timeout_ms
            );
        }
        if let Err(e) = reqwest::Url::parse(&self.api_url) {
            anyhow::bail!("invalid api url {:?}: {e}", self.api_url);
        }
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn warning_timeout(&self) -> Duration {
        Duration::from_millis(self.warning_timeout_ms)
    }

    /// Inactivity after which the warning prompt appears.
    pub fn warning_after(&self) -> Duration {
        self.inactivity_timeout().saturating_sub(self.warning_timeout())
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.token_refresh_interval_ms)
    }

    /// Idle time past which a background refresh tick actually refreshes.
    pub fn background_refresh_idle(&self) -> Duration {
        self.token_refresh_interval() / 5 * 4
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn access_token_grace(&self) -> Duration {
        Duration::from_millis(self.access_token_grace_ms)
    }

    pub fn heartbeat_backoff_max(&self) -> Duration {
        Duration::from_millis(self.heartbeat_backoff_max_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Build a small-scale config for tests: one-minute session, ten-second warning.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            api_url: "http://127.0.0.1:0".into(),
            inactivity_timeout_ms: 60_000,
            warning_timeout_ms: 10_000,
            token_refresh_interval_ms: 20_000,
            heartbeat_interval_ms: 15_000,
            access_token_grace_ms: 60_000,
            heartbeat_backoff_max_ms: 8_000,
            max_heartbeat_failures: 3,
            http_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
