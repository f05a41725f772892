// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The four auth endpoints the session layer consumes.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::token::{StoredUser, TokenPair};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const HEARTBEAT_PATH: &str = "/auth/heartbeat";

/// Backend auth operations.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a session record.
    ///
    /// 401 maps to [`SessionError::InvalidCredentials`].
    async fn login(&self, username: &str, password: &str) -> Result<StoredUser, SessionError>;

    /// Exchange a refresh token for a new pair, authenticated by the refresh token itself.
    ///
    /// 401 maps to [`SessionError::RefreshRejected`].
    async fn refresh(&self, refresh_token: &str, now_ms: u64) -> Result<TokenPair, SessionError>;

    /// Tell the backend the session is over.
    async fn logout(&self, access_token: &str) -> Result<(), SessionError>;

    /// Liveness ping; 401 maps to [`SessionError::Unauthorized`], 429 to
    /// [`SessionError::RateLimited`].
    async fn heartbeat(&self, access_token: &str) -> Result<(), SessionError>;
}

/// [`AuthBackend`] over the REST API.
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &SessionConfig) -> Self {
        crate::install_crypto_provider();
        let client = Client::builder().timeout(config.http_timeout()).build().unwrap_or_default();
        Self { base_url: config.base_url().to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, SessionError> {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req.send().await.map_err(|e| SessionError::from_transport(&e))
    }
}

/// Turn a non-2xx response into the generic error, consuming the body.
async fn status_error(resp: reqwest::Response) -> SessionError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    SessionError::from_status(status, &text)
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<StoredUser, SessionError> {
        let resp = self
            .post(LOGIN_PATH, None, json!({ "username": username, "password": password }))
            .await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(SessionError::InvalidCredentials),
            _ => return Err(status_error(resp).await),
        }
        let user: StoredUser = resp.json().await.map_err(|e| SessionError::ServerError {
            status: 200,
            message: format!("malformed login response: {e}"),
        })?;
        if !user.tokens.is_complete() {
            return Err(SessionError::ServerError {
                status: 200,
                message: "login response missing tokens".into(),
            });
        }
        Ok(user)
    }

    async fn refresh(&self, refresh_token: &str, now_ms: u64) -> Result<TokenPair, SessionError> {
        let resp =
            self.post(REFRESH_PATH, Some(refresh_token), json!({ "current_time": now_ms })).await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SessionError::RefreshRejected)
            }
            _ => return Err(status_error(resp).await),
        }
        let pair: TokenPair = resp.json().await.map_err(|e| SessionError::ServerError {
            status: 200,
            message: format!("malformed refresh response: {e}"),
        })?;
        if !pair.is_complete() {
            return Err(SessionError::RefreshRejected);
        }
        Ok(pair)
    }

    async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let resp = self.post(LOGOUT_PATH, Some(access_token), json!({})).await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    async fn heartbeat(&self, access_token: &str) -> Result<(), SessionError> {
        let resp = self.post(HEARTBEAT_PATH, Some(access_token), json!({})).await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(SessionError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(SessionError::RateLimited),
            _ => Err(status_error(resp).await),
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
