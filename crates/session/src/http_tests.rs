// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode as AxumStatus};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;
use crate::storage::{MemoryStorage, Storage, LAST_ACTIVITY_KEY};
use crate::test_support::{stored_user, MockBackend, TestClock, TEST_EPOCH_MS};

/// Application API double. Rejects bearer tokens in `revoked` (or all of
/// them once `always_401` is set) and counts hits.
#[derive(Clone, Default)]
struct ApiServer {
    revoked: Arc<Mutex<HashSet<String>>>,
    always_401: Arc<AtomicBool>,
    hits: Arc<AtomicU32>,
    bearers: Arc<Mutex<Vec<Option<String>>>>,
    /// Closed by the next hit, as if a logout began while it was in flight.
    close_on_hit: Arc<Mutex<Option<Arc<LogoutGate>>>>,
}

impl ApiServer {
    fn check(&self, headers: &HeaderMap) -> Result<(), AxumStatus> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        self.bearers.lock().push(bearer.clone());
        if let Some(gate) = self.close_on_hit.lock().take() {
            gate.try_begin();
        }
        let Some(token) = bearer else {
            return Err(AxumStatus::UNAUTHORIZED);
        };
        if self.always_401.load(Ordering::SeqCst) || self.revoked.lock().contains(&token) {
            return Err(AxumStatus::UNAUTHORIZED);
        }
        Ok(())
    }

    async fn spawn(&self) -> SocketAddr {
        let on_get = self.clone();
        let on_post = self.clone();
        let app = Router::new()
            .route(
                "/items",
                get(move |headers: HeaderMap| {
                    let server = on_get.clone();
                    async move {
                        server.check(&headers)?;
                        Ok::<_, AxumStatus>(Json(json!({ "items": [1, 2, 3] })))
                    }
                })
                .post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let server = on_post.clone();
                    async move {
                        server.check(&headers)?;
                        Ok::<_, AxumStatus>((AxumStatus::CREATED, Json(body)))
                    }
                }),
            )
            .route("/broken", get(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        addr
    }
}

struct Fixture {
    api: ApiClient,
    server: ApiServer,
    backend: Arc<MockBackend>,
    tokens: Arc<TokenStore>,
    activity: Arc<ActivityClock>,
    refresher: Arc<TokenRefresher>,
    gate: Arc<LogoutGate>,
    storage: Arc<MemoryStorage>,
}

async fn fixture(refresh_delay: Duration) -> anyhow::Result<Fixture> {
    let clock = Arc::new(TestClock::new());
    let storage = Arc::new(MemoryStorage::new());
    let backend = Arc::new(MockBackend::new(clock.clone()).refresh_delay(refresh_delay));
    let tokens =
        Arc::new(TokenStore::new(storage.clone(), clock.clone(), Duration::from_secs(60)));
    // Minted an hour ago so refreshed tokens never collide with it.
    tokens.set(stored_user("ada", TEST_EPOCH_MS - 3_600_000))?;
    let activity = Arc::new(ActivityClock::new(clock.clone(), storage.clone()));
    let gate = Arc::new(LogoutGate::default());
    let refresher =
        Arc::new(TokenRefresher::new(backend.clone(), tokens.clone(), clock, gate.clone()));

    let server = ApiServer::default();
    let addr = server.spawn().await;
    let config = SessionConfig { api_url: format!("http://{addr}"), ..SessionConfig::test() };
    let api = ApiClient::new(
        &config,
        tokens.clone(),
        activity.clone(),
        refresher.clone(),
        gate.clone(),
    );
    Ok(Fixture { api, server, backend, tokens, activity, refresher, gate, storage })
}

fn revoke_current(f: &Fixture) {
    if let Some(token) = f.tokens.access_token() {
        f.server.revoked.lock().insert(token);
    }
}

#[tokio::test]
async fn attaches_bearer_and_counts_as_activity() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    assert_eq!(f.activity.last_activity(), None);

    let body: Value = f.api.json(ApiRequest::get("/items")).await?;
    assert_eq!(body["items"], json!([1, 2, 3]));
    assert_eq!(f.server.bearers.lock().clone(), vec![f.tokens.access_token()]);
    assert!(f.activity.last_activity().is_some());
    assert_eq!(f.backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unauthorized_refreshes_and_retries_once() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    let stale = f.tokens.access_token();
    revoke_current(&f);

    let resp = f.api.send(ApiRequest::post("/items").json(json!({ "name": "x" }))).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let echoed: Value = resp.json().await?;
    assert_eq!(echoed["name"], "x");

    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 2);
    let bearers = f.server.bearers.lock().clone();
    assert_eq!(bearers[0], stale);
    assert_eq!(bearers[1], f.tokens.access_token());
    assert_ne!(bearers[0], bearers[1]);
    Ok(())
}

#[tokio::test]
async fn persistent_unauthorized_retries_exactly_once() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    f.server.always_401.store(true, Ordering::SeqCst);

    let err = f.api.send(ApiRequest::get("/items")).await.expect_err("should stay unauthorized");
    assert_eq!(err, SessionError::Unauthorized);
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 2);
    assert_eq!(f.backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_surfaces_unauthorized_without_retry() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    f.backend.push_refresh(Err(SessionError::RefreshRejected));
    revoke_current(&f);

    let err = f.api.send(ApiRequest::get("/items")).await.expect_err("refresh fails");
    assert_eq!(err, SessionError::Unauthorized);
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 1);
    assert!(f.tokens.get().is_none());
    Ok(())
}

#[tokio::test]
async fn rides_on_refresh_already_in_flight() -> anyhow::Result<()> {
    let f = fixture(Duration::from_millis(200)).await?;
    revoke_current(&f);

    let refresher = Arc::clone(&f.refresher);
    let background = tokio::spawn(async move { refresher.refresh().await });
    while !f.refresher.is_in_flight() {
        tokio::task::yield_now().await;
    }

    let body: Value = f.api.json(ApiRequest::get("/items")).await?;
    assert_eq!(body["items"], json!([1, 2, 3]));
    assert!(matches!(background.await?, RefreshOutcome::Refreshed(_)));
    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn rejected_while_logging_out() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    assert!(f.gate.try_begin());
    assert!(!f.gate.try_begin());

    let err = f.api.send(ApiRequest::get("/items")).await.expect_err("gate is closed");
    assert_eq!(err, SessionError::LoggingOut);
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 0);

    f.gate.end();
    f.api.send(ApiRequest::get("/items")).await?;
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unauthorized_answer_during_logout_does_not_refresh() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    revoke_current(&f);
    *f.server.close_on_hit.lock() = Some(Arc::clone(&f.gate));

    let err = f.api.send(ApiRequest::get("/items")).await.expect_err("logout began");
    assert_eq!(err, SessionError::LoggingOut);
    assert!(f.gate.is_active());
    assert_eq!(f.server.hits.load(Ordering::SeqCst), 1);
    assert_eq!(f.backend.refresh_calls(), 0);
    assert!(f.tokens.get().is_some());
    Ok(())
}

#[tokio::test]
async fn anonymous_requests_leave_no_activity() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    f.tokens.clear();

    let resp = f.api.send(ApiRequest::get("/broken")).await?;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(f.activity.last_activity(), None);
    assert_eq!(f.storage.get(LAST_ACTIVITY_KEY), None);
    Ok(())
}

#[tokio::test]
async fn other_errors_pass_through_untouched() -> anyhow::Result<()> {
    let f = fixture(Duration::ZERO).await?;
    let resp = f.api.send(ApiRequest::get("/broken")).await?;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    crate::assert_err_contains!(
        f.api.json::<Value>(ApiRequest::get("/broken")).await,
        "server error (502): upstream down"
    );
    assert_eq!(f.backend.refresh_calls(), 0);
    Ok(())
}

#[test]
fn request_context_starts_without_retries() {
    let req = ApiRequest::delete("/items/1");
    assert_eq!(req.context().retries(), 0);
    assert!(req.context().can_retry());
}
