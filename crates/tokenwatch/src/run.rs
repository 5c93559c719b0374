// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level session runner, shared by `main` and integration tests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{AuthBackend, CsrfStore, HttpAuthBackend};
use crate::config::Config;
use crate::error::SessionError;
use crate::keeper::{KeeperParts, SessionKeeper};
use crate::logout::LocalLogout;
use crate::policy::{ConfigProvider, SessionPolicy};
use crate::terminal::{self, TerminalDialog};
use crate::user_store::UserStore;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    LoggedOut,
    Interrupted,
    NotAuthenticated,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LoggedOut => 0,
            Self::Interrupted => 130,
            Self::NotAuthenticated => 1,
        }
    }
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// A wired session, ready to check the login and start counting down.
pub struct PreparedSession {
    pub keeper: Arc<SessionKeeper>,
    pub dialog: Arc<TerminalDialog>,
    pub shutdown: CancellationToken,
    logged_out: CancellationToken,
    backend: Arc<HttpAuthBackend>,
    users: UserStore,
    api: Url,
    config: Config,
}

/// Build the HTTP client, backend, logout path and keeper, and start loading
/// the runtime config in the background.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedSession> {
    init_tracing(&config);

    let api = config.api_base()?;
    let shutdown = CancellationToken::new();
    let logged_out = CancellationToken::new();

    // 1. One cookie jar shared by every call, auth and API alike.
    let jar = Arc::new(Jar::default());
    if let Some(ref value) = config.session_cookie {
        seed_session_cookie(&jar, &config.session_cookie_name, value, &api);
    }
    let http = reqwest::Client::builder()
        .cookie_provider(Arc::clone(&jar))
        .timeout(HTTP_TIMEOUT)
        .build()?;

    // 2. Collaborators, then the keeper.
    let csrf = Arc::new(CsrfStore::default());
    let backend = Arc::new(HttpAuthBackend::new(http.clone(), api.clone(), Arc::clone(&csrf)));
    let state_dir = config.state_dir();
    let logout = Arc::new(LocalLogout::new(
        backend.clone(),
        UserStore::new(&state_dir),
        logged_out.clone(),
    ));
    let dialog = TerminalDialog::new();
    let keeper = SessionKeeper::new(
        KeeperParts {
            http: http.clone(),
            backend: backend.clone(),
            logout,
            dialog: dialog.clone(),
            csrf,
            timings: config.timings(),
        },
        shutdown.clone(),
    );

    // 3. Token lifetime may arrive after the session starts.
    let lifetime_override = config.lifetime_minutes;
    if let Some(minutes) = lifetime_override {
        keeper.apply_policy(SessionPolicy::with_lifetime(minutes));
    }
    let provider = ConfigProvider::new(http, api.clone(), config.runtime_config.clone());
    tokio::spawn({
        let keeper = Arc::clone(&keeper);
        async move {
            match provider.load().await {
                Ok(props) => {
                    let policy =
                        SessionPolicy::from_props(&props).with_lifetime_override(lifetime_override);
                    keeper.apply_policy(policy);
                }
                Err(e) => warn!(err = %e, "failed to load runtime config"),
            }
        }
    });

    // 4. CSRF token for state-changing calls.
    if let Err(e) = backend.fetch_csrf().await {
        warn!(err = %e, "failed to fetch csrf token");
    }

    Ok(PreparedSession {
        keeper,
        dialog,
        shutdown,
        logged_out,
        backend,
        users: UserStore::new(&state_dir),
        api,
        config,
    })
}

impl PreparedSession {
    /// Verify the login, persist the user and start the countdown.
    pub async fn start(&self) -> anyhow::Result<bool> {
        let check = self.backend.check_session().await?;
        if !check.authenticated {
            warn!(requires_reauth = check.requires_reauth, "not authenticated, log in first");
            return Ok(false);
        }

        let user = match check.user {
            Some(user) => Some(user),
            None => self.backend.current_user().await.unwrap_or_else(|e| {
                warn!(err = %e, "failed to fetch current user");
                None
            }),
        };
        if let Some(ref user) = user {
            if let Err(e) = self.users.save(user) {
                warn!(err = %e, "failed to persist current user");
            }
        }

        match self.keeper.start_session() {
            Ok(()) => {}
            Err(SessionError::ConfigNotReady) => {
                info!("session start deferred until the token lifetime is known");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Resolves once the logout path has finished.
    pub fn logged_out(&self) -> CancellationToken {
        self.logged_out.clone()
    }

    /// Run until logout or Ctrl-C.
    pub async fn run(self) -> anyhow::Result<RunOutcome> {
        if !self.start().await? {
            self.shutdown.cancel();
            return Ok(RunOutcome::NotAuthenticated);
        }

        terminal::spawn_input(
            Arc::clone(&self.keeper),
            Arc::clone(&self.dialog),
            self.shutdown.clone(),
        );
        if let Some(ref path) = self.config.probe_path {
            let url = self.api.join(path.trim_start_matches('/'))?;
            spawn_probe(
                Arc::clone(&self.keeper),
                url,
                self.config.probe_interval(),
                self.shutdown.clone(),
            );
        }

        let outcome = tokio::select! {
            _ = self.logged_out.cancelled() => RunOutcome::LoggedOut,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping session");
                self.keeper.stop_session();
                RunOutcome::Interrupted
            }
        };
        self.shutdown.cancel();
        Ok(outcome)
    }
}

/// Run a session to completion.
pub async fn run(config: Config) -> anyhow::Result<RunOutcome> {
    prepare(config).await?.run().await
}

/// Put an existing login's session cookie into the jar.
pub fn seed_session_cookie(jar: &Jar, name: &str, value: &str, api: &Url) {
    jar.add_cookie_str(&format!("{name}={value}; Path=/"), api);
}

/// Periodic API call through the gatekeeper, standing in for application
/// traffic.
pub fn spawn_probe(
    keeper: Arc<SessionKeeper>,
    url: Url,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let gatekeeper = keeper.gatekeeper();
            match gatekeeper.send(gatekeeper.client().get(url.clone())).await {
                Ok(resp) => debug!(url = %url, status = %resp.status(), "probe"),
                Err(SessionError::AuthExpired) => warn!(url = %url, "probe: session expired"),
                Err(e) => warn!(url = %url, err = %e, "probe failed"),
            }
        }
    })
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
