// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login rejected by the backend (401).
    InvalidCredentials,
    /// No response from the backend (connect error, timeout, reset).
    NetworkUnavailable(String),
    /// Any other non-2xx answer.
    ServerError { status: u16, message: String },
    /// Backend declared the refresh token invalid.
    RefreshRejected,
    /// Heartbeat answered 429.
    RateLimited,
    /// A 401 outside the refresh exchange that could not be recovered.
    Unauthorized,
    /// Request rejected because a logout is in progress.
    LoggingOut,
    /// Operation needs a logged-in session.
    NotAuthenticated,
    /// `login` called while a session already exists.
    AlreadyAuthenticated,
    /// Durable storage write failed.
    Storage(String),
}

impl SessionError {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::RefreshRejected => "REFRESH_REJECTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::LoggingOut => "LOGGING_OUT",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::AlreadyAuthenticated => "ALREADY_AUTHENTICATED",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Whether retrying later may succeed without user intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::RateLimited)
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        Self::NetworkUnavailable(err.to_string())
    }

    /// Classify a non-2xx status that has no endpoint-specific meaning.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::ServerError { status: status.as_u16(), message: body.trim().to_owned() }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => f.write_str("invalid username or password"),
            Self::NetworkUnavailable(msg) => write!(f, "network unavailable: {msg}"),
            Self::ServerError { status, message } if message.is_empty() => {
                write!(f, "server error ({status})")
            }
            Self::ServerError { status, message } => write!(f, "server error ({status}): {message}"),
            Self::RefreshRejected => f.write_str("refresh token rejected"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::LoggingOut => f.write_str("logout in progress"),
            Self::NotAuthenticated => f.write_str("not authenticated"),
            Self::AlreadyAuthenticated => f.write_str("already authenticated"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
