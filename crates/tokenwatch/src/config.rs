// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use crate::inactivity::INACTIVITY_POLL_INTERVAL;
use crate::keeper::Timings;
use crate::policy::with_trailing_slash;
use crate::tracker::TICK_INTERVAL;

/// Keeps an authenticated API session alive: token countdown, sliding
/// refresh and expiry warnings.
#[derive(Debug, Parser)]
#[command(name = "tokenwatch", version, about)]
pub struct Config {
    /// Base URL of the API backend.
    #[arg(long, env = "TOKENWATCH_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Runtime configuration document (runtime-config.json).
    #[arg(long, env = "TOKENWATCH_RUNTIME_CONFIG")]
    pub runtime_config: Option<PathBuf>,

    /// Override the access-token lifetime in minutes.
    #[arg(long, env = "TOKENWATCH_LIFETIME_MINUTES")]
    pub lifetime_minutes: Option<u32>,

    /// Session cookie value from an existing login.
    #[arg(long, env = "TOKENWATCH_SESSION_COOKIE")]
    pub session_cookie: Option<String>,

    /// Name of the session cookie.
    #[arg(long, env = "TOKENWATCH_SESSION_COOKIE_NAME", default_value = "SESSION")]
    pub session_cookie_name: String,

    /// API path to call periodically through the gatekeeper.
    #[arg(long, env = "TOKENWATCH_PROBE_PATH")]
    pub probe_path: Option<String>,

    /// Interval between probe calls in milliseconds.
    #[arg(long, env = "TOKENWATCH_PROBE_INTERVAL_MS", default_value = "30000")]
    pub probe_interval_ms: u64,

    /// Directory for the persisted current user.
    #[arg(long, env = "TOKENWATCH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TOKENWATCH_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOKENWATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub tick_ms: Option<u64>,
    #[clap(skip)]
    pub inactivity_poll_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.api_base()?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--api-url must be http or https, got {}", url.scheme());
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if self.lifetime_minutes == Some(0) {
            anyhow::bail!("--lifetime-minutes must be positive");
        }
        if self.probe_path.is_some() && self.probe_interval_ms == 0 {
            anyhow::bail!("--probe-interval-ms must be positive");
        }
        if self.session_cookie_name.is_empty() {
            anyhow::bail!("--session-cookie-name must not be empty");
        }
        Ok(())
    }

    /// API base with a trailing slash, ready for [`Url::join`].
    pub fn api_base(&self) -> anyhow::Result<Url> {
        Url::parse(&with_trailing_slash(&self.api_url))
            .map_err(|e| anyhow::anyhow!("invalid --api-url {}: {e}", self.api_url))
    }

    /// Resolve the state directory: flag or env, then XDG, then HOME.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("tokenwatch");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/tokenwatch");
        }
        PathBuf::from(".tokenwatch")
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    duration_field!(tick, tick_ms, "TOKENWATCH_TICK_MS", TICK_INTERVAL);
    duration_field!(
        inactivity_poll,
        inactivity_poll_ms,
        "TOKENWATCH_INACTIVITY_POLL_MS",
        INACTIVITY_POLL_INTERVAL
    );

    pub fn timings(&self) -> Timings {
        Timings { tick: self.tick(), inactivity_poll: self.inactivity_poll() }
    }

    /// Build a minimal `Config` for tests.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".into(),
            runtime_config: None,
            lifetime_minutes: None,
            session_cookie: None,
            session_cookie_name: "SESSION".into(),
            probe_path: None,
            probe_interval_ms: 30_000,
            state_dir: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            tick_ms: Some(1_000),
            inactivity_poll_ms: Some(30_000),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
