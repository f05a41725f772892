// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token pair ownership, persistence, and the access-token freshness heuristic.
//!
//! Freshness is read from the unsigned payload segment of the access token.
//! It is a scheduling hint only; the backend remains the authority on whether
//! a token is valid.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::SessionError;
use crate::storage::{Storage, USER_KEY};

/// Access + refresh token, always held together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }

    /// Both halves present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    format!("{head}…({} chars)", token.chars().count())
}

/// The durable `user` record: tokens plus whatever profile the login returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl StoredUser {
    pub fn new(tokens: TokenPair, profile: Map<String, Value>) -> Self {
        Self { tokens, profile }
    }

    /// Display name from the profile (`username`, then `name`, then `email`).
    pub fn username(&self) -> Option<&str> {
        ["username", "name", "email"].iter().find_map(|k| self.profile.get(*k)?.as_str())
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity { username: self.username().map(str::to_owned), profile: self.profile.clone() }
    }
}

/// Snapshot of the logged-in identity, without credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserIdentity {
    pub username: Option<String>,
    pub profile: Map<String, Value>,
}

struct Slot {
    user: Option<StoredUser>,
    /// Bumped whenever a session starts or ends, so late refresh results
    /// from an older session can be recognised and dropped.
    generation: u64,
}

/// Owns the current token pair in memory and in durable storage.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    slot: RwLock<Slot>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self { storage, clock, grace, slot: RwLock::new(Slot { user: None, generation: 0 }) }
    }

    pub fn get(&self) -> Option<TokenPair> {
        self.slot.read().user.as_ref().map(|u| u.tokens.clone())
    }

    pub fn user(&self) -> Option<StoredUser> {
        self.slot.read().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.slot.read().user.as_ref().map(|u| u.tokens.access_token.clone())
    }

    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    /// Install a new session record. Returns the new generation.
    ///
    /// Storage is written first; memory only changes if that write lands.
    pub fn set(&self, user: StoredUser) -> Result<u64, SessionError> {
        if !user.tokens.is_complete() {
            return Err(SessionError::Storage("refusing to store incomplete token pair".into()));
        }
        let mut slot = self.slot.write();
        write_user(self.storage.as_ref(), &user)?;
        slot.user = Some(user);
        slot.generation += 1;
        Ok(slot.generation)
    }

    /// Swap in a rotated token pair if the session from `generation` is still current.
    ///
    /// Returns `Ok(false)` without touching anything when the session changed
    /// in the meantime.
    pub fn replace_if(&self, generation: u64, pair: TokenPair) -> Result<bool, SessionError> {
        if !pair.is_complete() {
            return Err(SessionError::Storage("refusing to store incomplete token pair".into()));
        }
        let mut slot = self.slot.write();
        if slot.generation != generation {
            return Ok(false);
        }
        let Some(current) = slot.user.as_ref() else {
            return Ok(false);
        };
        let next = StoredUser { tokens: pair, profile: current.profile.clone() };
        write_user(self.storage.as_ref(), &next)?;
        slot.user = Some(next);
        Ok(true)
    }

    /// Drop the session from memory and storage.
    pub fn clear(&self) {
        let mut slot = self.slot.write();
        slot.user = None;
        slot.generation += 1;
        if let Err(e) = self.storage.remove(USER_KEY) {
            warn!(err = %e, "failed to remove stored user");
        }
    }

    /// Clear only if the session from `generation` is still current.
    pub fn clear_if(&self, generation: u64) -> bool {
        if self.slot.read().generation != generation {
            return false;
        }
        self.clear();
        true
    }

    /// Load the persisted record into memory (page reload / restart).
    ///
    /// A malformed record is removed and treated as absent.
    pub fn load(&self) -> Option<StoredUser> {
        let raw = self.storage.get(USER_KEY)?;
        let user = match serde_json::from_str::<StoredUser>(&raw) {
            Ok(u) if u.tokens.is_complete() => u,
            Ok(_) | Err(_) => {
                warn!("discarding malformed stored user record");
                let _ = self.storage.remove(USER_KEY);
                return None;
            }
        };
        let mut slot = self.slot.write();
        slot.user = Some(user.clone());
        slot.generation += 1;
        Some(user)
    }

    /// True iff the access token's embedded `created_at` is within the grace window.
    ///
    /// Undecodable tokens are never fresh.
    pub fn is_access_token_fresh(&self, pair: &TokenPair) -> bool {
        match access_token_created_at_ms(&pair.access_token) {
            Some(created_at) => {
                let fresh_until = created_at.saturating_add(self.grace.as_millis() as u64);
                self.clock.now_ms() < fresh_until
            }
            None => {
                debug!("access token has no decodable created_at");
                false
            }
        }
    }
}

fn write_user(storage: &dyn Storage, user: &StoredUser) -> Result<(), SessionError> {
    let json = serde_json::to_string(user).map_err(|e| SessionError::Storage(e.to_string()))?;
    storage.set(USER_KEY, &json).map_err(|e| SessionError::Storage(format!("{e:#}")))
}

/// Timestamps below this are taken to be seconds rather than milliseconds.
const SECONDS_CUTOFF: f64 = 100_000_000_000.0;

/// Decode the issue time embedded in a JWT-shaped access token, in epoch ms.
///
/// Reads `created_at` (seconds or milliseconds, number or numeric string),
/// falling back to the standard `iat` claim. No signature check is made.
pub fn access_token_created_at_ms(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let raw = claims.get("created_at").or_else(|| claims.get("iat"))?;
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let ms = if value < SECONDS_CUTOFF { value * 1000.0 } else { value };
    Some(ms as u64)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
