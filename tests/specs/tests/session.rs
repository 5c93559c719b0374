// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process sessions against the fake admissions backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use tokenwatch::error::SessionError;
use tokenwatch::user_store::UserStore;
use tokenwatch_specs::{
    ensure_crypto, wait_until, FakeAdmissions, RefreshMode, CSRF_TOKEN, PROTECTED_PATH,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn url(backend: &FakeAdmissions, path: &str) -> String {
    format!("{}/{path}", backend.base_url())
}

#[tokio::test]
async fn expired_cookie_is_refreshed_and_request_replayed() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    let gk = session.keeper.gatekeeper();
    let resp = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.state().refresh_calls(), 1);
    assert_eq!(backend.state().protected_calls(), 2);
    assert!(session.keeper.state().is_active());
    Ok(())
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_refresh_delay(Duration::from_millis(300));
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    let mut calls = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let keeper = Arc::clone(&session.keeper);
        let target = url(&backend, PROTECTED_PATH);
        calls.spawn(async move {
            let gk = keeper.gatekeeper();
            gk.send(gk.client().get(target)).await.map(|r| r.status())
        });
    }
    while let Some(joined) = calls.join_next().await {
        assert_eq!(joined??, StatusCode::OK);
    }

    assert_eq!(backend.state().refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn sliding_window_refreshes_before_the_call() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_config(json!({
        "jwtAccessTokenExpirationMinutes": 15,
        "slidingThresholdPercent": 100,
    }));
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    let gk = session.keeper.gatekeeper();
    let resp = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.state().refresh_calls(), 1);
    // The stale cookie never reached the resource.
    assert_eq!(backend.state().protected_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn auth_endpoints_skip_refresh() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_config(json!({
        "jwtAccessTokenExpirationMinutes": 15,
        "slidingThresholdPercent": 100,
    }));
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    let gk = session.keeper.gatekeeper();
    let resp = gk.send(gk.client().get(url(&backend, "api/auth/user"))).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.state().refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn reauth_required_logs_out_once() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_refresh_mode(RefreshMode::RequiresReauth);
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;
    let users = UserStore::new(dir.path());
    assert!(users.load()?.is_some());

    let gk = session.keeper.gatekeeper();
    let result = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await;
    assert!(matches!(result, Err(SessionError::AuthExpired)), "got {result:?}");

    let logged_out = session.logged_out();
    tokio::time::timeout(TIMEOUT, logged_out.cancelled()).await?;
    assert_eq!(backend.state().logout_calls(), 1);
    assert!(!session.keeper.state().is_active());
    assert!(users.load()?.is_none());

    // A later call fails without a second logout.
    let again = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await;
    assert!(again.is_err());
    assert_eq!(backend.state().logout_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn unauthorized_refresh_ends_session() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_refresh_mode(RefreshMode::Unauthorized);
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    let gk = session.keeper.gatekeeper();
    let result = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await;
    assert!(matches!(result, Err(SessionError::AuthExpired)), "got {result:?}");

    tokio::time::timeout(TIMEOUT, session.logged_out().cancelled()).await?;
    assert_eq!(backend.state().logout_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn csrf_header_only_on_state_changing_calls() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;
    let gk = session.keeper.gatekeeper();

    let resp = gk
        .send(gk.client().post(url(&backend, PROTECTED_PATH)).json(&json!({ "program": "MSc" })))
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.state().last_csrf().as_deref(), Some(CSRF_TOKEN));

    let resp = gk.send(gk.client().get(url(&backend, PROTECTED_PATH))).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.state().last_csrf(), None);
    Ok(())
}

#[tokio::test]
async fn runtime_document_merges_backend_lifetime() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_config(json!({
        "jwtAccessTokenExpirationMinutes": 20,
        "jwtRefreshTokenExpirationDays": 7,
        "slidingThresholdPercent": 100,
    }));
    let dir = tempfile::tempdir()?;
    let runtime = dir.path().join("runtime-config.json");
    std::fs::write(&runtime, r#"{"appEnv":"test","slidingThresholdPercent":25}"#)?;

    let mut config = backend.config(dir.path());
    config.runtime_config = Some(runtime);
    let session = backend.session(config).await?;

    let policy = session.keeper.policy();
    assert_eq!(policy.token_lifetime_minutes, Some(20));
    assert_eq!(policy.sliding_threshold_percent, 25);
    assert!(session.keeper.state().remaining_secs > 20 * 60 - 5);
    Ok(())
}

#[tokio::test]
async fn start_waits_for_backend_lifetime() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_config(json!({ "appEnv": "test" }));
    let dir = tempfile::tempdir()?;
    ensure_crypto();
    let session = tokenwatch::run::prepare(backend.config(dir.path())).await?;

    assert!(session.start().await?);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.keeper.state().is_active());

    // A lifetime arriving later completes the start.
    session.keeper.apply_policy(tokenwatch::policy::SessionPolicy::with_lifetime(5));
    let keeper = Arc::clone(&session.keeper);
    wait_until(TIMEOUT, || keeper.state().is_active()).await?;
    Ok(())
}

#[tokio::test]
async fn unauthenticated_login_is_not_started() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_authenticated(false);
    let dir = tempfile::tempdir()?;
    ensure_crypto();
    let session = tokenwatch::run::prepare(backend.config(dir.path())).await?;

    assert!(!session.start().await?);
    assert!(!session.keeper.state().is_active());
    assert!(UserStore::new(dir.path()).load()?.is_none());
    Ok(())
}

#[tokio::test]
async fn user_logout_runs_backend_logout_once() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    let dir = tempfile::tempdir()?;
    let session = backend.session(backend.config(dir.path())).await?;

    assert!(session.keeper.logout().await);
    assert!(!session.keeper.logout().await);
    assert!(session.logged_out().is_cancelled());
    assert_eq!(backend.state().logout_calls(), 1);
    Ok(())
}
