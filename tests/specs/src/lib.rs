// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session tests.
//!
//! Serves a fake admissions backend over HTTP (auth, config and one
//! protected resource) and wires a real session against it, either
//! in-process or through the compiled `tokenwatch` binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};

use tokenwatch::config::Config;
use tokenwatch::run::{prepare, PreparedSession};

pub const STALE_COOKIE: &str = "stale";
pub const FRESH_COOKIE: &str = "fresh";
pub const CSRF_TOKEN: &str = "csrf-token-1";
pub const PROTECTED_PATH: &str = "api/applications";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `tokenwatch` binary.
pub fn tokenwatch_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tokenwatch")
}

/// How the fake backend answers `POST api/auth/refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rotate the session cookie to [`FRESH_COOKIE`].
    Rotate,
    /// `{"success": false, "requiresReauth": true}`.
    RequiresReauth,
    /// Plain 401.
    Unauthorized,
}

/// Observable state of the fake backend.
pub struct BackendState {
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub protected_calls: AtomicUsize,
    pub authenticated: AtomicBool,
    refresh_mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    config: Mutex<Value>,
    last_csrf: Mutex<Option<String>>,
}

impl BackendState {
    fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            authenticated: AtomicBool::new(true),
            refresh_mode: Mutex::new(RefreshMode::Rotate),
            refresh_delay: Mutex::new(Duration::ZERO),
            config: Mutex::new(json!({ "jwtAccessTokenExpirationMinutes": 15 })),
            last_csrf: Mutex::new(None),
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn protected_calls(&self) -> usize {
        self.protected_calls.load(Ordering::SeqCst)
    }

    /// CSRF header seen on the most recent protected call.
    pub fn last_csrf(&self) -> Option<String> {
        self.last_csrf.lock().clone()
    }
}

/// A fake admissions backend on an ephemeral port, stopped on drop.
pub struct FakeAdmissions {
    addr: SocketAddr,
    state: Arc<BackendState>,
    _stop: DropGuard,
}

impl FakeAdmissions {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(BackendState::new());
        let router = Router::new()
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/session", get(check_session))
            .route("/api/auth/user", get(current_user))
            .route("/api/auth/csrf", get(csrf))
            .route("/api/config/environmentProperties", get(environment_properties))
            .route("/api/applications", get(protected).post(protected))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stop = CancellationToken::new();
        let sd = stop.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        });

        Ok(Self { addr, state, _stop: stop.drop_guard() })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.state.refresh_mode.lock() = mode;
    }

    /// Hold every refresh response for `delay` so concurrent callers overlap.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock() = delay;
    }

    /// Replace the environment-properties document.
    pub fn set_config(&self, config: Value) {
        *self.state.config.lock() = config;
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.state.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// A test config pointed at this backend with a stale session cookie.
    pub fn config(&self, state_dir: &Path) -> Config {
        Config {
            api_url: self.base_url(),
            session_cookie: Some(STALE_COOKIE.into()),
            state_dir: Some(state_dir.to_path_buf()),
            log_level: "warn".into(),
            ..Config::test()
        }
    }

    /// Wire a session in-process and wait for its countdown to start.
    pub async fn session(&self, config: Config) -> anyhow::Result<PreparedSession> {
        ensure_crypto();
        let session = prepare(config).await?;
        anyhow::ensure!(session.start().await?, "fake backend rejected the session");
        let keeper = Arc::clone(&session.keeper);
        wait_until(Duration::from_secs(5), || keeper.state().is_active()).await?;
        Ok(session)
    }
}

fn user() -> Value {
    json!({ "username": "applicant", "roles": ["APPLICANT"] })
}

async fn refresh(State(s): State<Arc<BackendState>>) -> Response {
    s.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *s.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let mode = *s.refresh_mode.lock();
    match mode {
        RefreshMode::Rotate => (
            [(header::SET_COOKIE, format!("SESSION={FRESH_COOKIE}; Path=/"))],
            Json(json!({ "success": true })),
        )
            .into_response(),
        RefreshMode::RequiresReauth => {
            Json(json!({ "success": false, "requiresReauth": true })).into_response()
        }
        RefreshMode::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn logout(State(s): State<Arc<BackendState>>) -> StatusCode {
    s.logout_calls.fetch_add(1, Ordering::SeqCst);
    s.authenticated.store(false, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn check_session(State(s): State<Arc<BackendState>>) -> Json<Value> {
    if s.authenticated.load(Ordering::SeqCst) {
        Json(json!({ "authenticated": true, "user": user() }))
    } else {
        Json(json!({ "authenticated": false }))
    }
}

async fn current_user(State(s): State<Arc<BackendState>>) -> Response {
    if s.authenticated.load(Ordering::SeqCst) {
        Json(user()).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn csrf() -> Json<Value> {
    Json(json!({ "token": CSRF_TOKEN, "headerName": "X-XSRF-TOKEN" }))
}

async fn environment_properties(State(s): State<Arc<BackendState>>) -> Json<Value> {
    Json(s.config.lock().clone())
}

async fn protected(State(s): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    s.protected_calls.fetch_add(1, Ordering::SeqCst);
    *s.last_csrf.lock() =
        headers.get("x-xsrf-token").and_then(|v| v.to_str().ok()).map(str::to_owned);

    let fresh = format!("SESSION={FRESH_COOKIE}");
    let authorized = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(';').any(|c| c.trim() == fresh));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "applications": [] })).into_response()
}

/// Poll `check` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
