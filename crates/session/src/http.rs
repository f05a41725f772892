// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request pipeline for application API calls.
//!
//! Every request gets the current access token and, while a session exists,
//! counts as user activity.
//! A 401 triggers at most one refresh-and-retry per original request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::activity::ActivityClock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::refresher::{RefreshOutcome, TokenRefresher};
use crate::token::TokenStore;

/// Closed while a logout is running; outbound API calls are refused.
#[derive(Debug, Default)]
pub struct LogoutGate {
    active: AtomicBool,
}

impl LogoutGate {
    /// Mark a logout as started. False if one already is.
    pub fn try_begin(&self) -> bool {
        self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Per-request retry bookkeeping, carried with the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    retries: u8,
}

impl RequestContext {
    pub const MAX_RETRIES: u8 = 1;

    pub fn retries(&self) -> u8 {
        self.retries
    }

    fn can_retry(&self) -> bool {
        self.retries < Self::MAX_RETRIES
    }

    fn mark_retried(&mut self) {
        self.retries += 1;
    }
}

/// One application API call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    ctx: RequestContext,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, ctx: RequestContext::default() }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn context(&self) -> RequestContext {
        self.ctx
    }
}

/// The HTTP boundary handed to application code.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    activity: Arc<ActivityClock>,
    refresher: Arc<TokenRefresher>,
    gate: Arc<LogoutGate>,
}

impl ApiClient {
    pub fn new(
        config: &SessionConfig,
        tokens: Arc<TokenStore>,
        activity: Arc<ActivityClock>,
        refresher: Arc<TokenRefresher>,
        gate: Arc<LogoutGate>,
    ) -> Self {
        crate::install_crypto_provider();
        let client = Client::builder().timeout(config.http_timeout()).build().unwrap_or_default();
        Self { client, base_url: config.base_url().to_owned(), tokens, activity, refresher, gate }
    }

    /// Send a request, refreshing and retrying once on 401.
    ///
    /// Non-401 statuses are returned untouched. A 401 that survives the retry
    /// (or whose refresh fails) becomes [`SessionError::Unauthorized`].
    pub async fn send(&self, mut req: ApiRequest) -> Result<Response, SessionError> {
        loop {
            if self.gate.is_active() {
                debug!(path = %req.path, "request rejected, logout in progress");
                return Err(SessionError::LoggingOut);
            }
            let token = self.tokens.access_token();
            // Anonymous calls must not leave a lastActivity behind a logout.
            if token.is_some() {
                self.activity.touch();
            }
            let resp = self.dispatch(&req, token.as_deref()).await?;
            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            if !req.ctx.can_retry() {
                warn!(path = %req.path, "request still unauthorized after retry");
                return Err(SessionError::Unauthorized);
            }
            req.ctx.mark_retried();

            match self.refresher.refresh().await {
                RefreshOutcome::Refreshed(_) => {
                    debug!(path = %req.path, "retrying request with refreshed token");
                }
                RefreshOutcome::Busy => {
                    // Ride on the refresh already running.
                    self.refresher.settled().await;
                    if self.tokens.get().is_none() {
                        return Err(SessionError::Unauthorized);
                    }
                    debug!(path = %req.path, "retrying request after concurrent refresh");
                }
                RefreshOutcome::Failed(SessionError::LoggingOut) => {
                    debug!(path = %req.path, "logout started while request was in flight");
                    return Err(SessionError::LoggingOut);
                }
                RefreshOutcome::Failed(e) => {
                    warn!(path = %req.path, err = %e, "refresh after 401 failed");
                    return Err(SessionError::Unauthorized);
                }
            }
        }
    }

    /// Send a request and decode a 2xx JSON body.
    pub async fn json<T: serde::de::DeserializeOwned>(
        &self,
        req: ApiRequest,
    ) -> Result<T, SessionError> {
        let resp = self.send(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SessionError::from_status(status, &text));
        }
        resp.json().await.map_err(|e| SessionError::ServerError {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
        })
    }

    async fn dispatch(
        &self,
        req: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Response, SessionError> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.client.request(req.method.clone(), url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(|e| SessionError::from_transport(&e))
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
