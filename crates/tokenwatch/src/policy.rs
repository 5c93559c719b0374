// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session policy: the runtime configuration document and the lifetime,
//! warning and sliding thresholds derived from it.
//!
//! The token lifetime is policy-controlled by the backend, so there is no
//! built-in default. Until the provider has loaded it, the tracker refuses to
//! start a countdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::URL_CONFIG_ENV_PROPS;

pub const DEFAULT_WARNING_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_SLIDING_THRESHOLD_PERCENT: u8 = 50;

/// Runtime configuration served by the deployment (`runtime-config.json`)
/// or by the backend's environment-properties endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_env_name: Option<String>,
    /// Backend base URL; used to locate the config endpoint when the
    /// runtime document lacks token settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_access_token_expiration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_refresh_token_expiration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_threshold_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sliding_threshold_percent: Option<u8>,
}

impl EnvironmentProps {
    /// Overlay the backend's token settings onto a runtime document.
    pub fn merge_jwt(mut self, backend: &EnvironmentProps) -> Self {
        self.jwt_access_token_expiration_minutes = backend.jwt_access_token_expiration_minutes;
        self.jwt_refresh_token_expiration_days = backend.jwt_refresh_token_expiration_days;
        self
    }

    pub fn has_token_lifetime(&self) -> bool {
        self.jwt_access_token_expiration_minutes.is_some_and(|m| m > 0)
    }
}

/// Effective lifetime policy consumed by the tracker, gatekeeper and
/// inactivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub token_lifetime_minutes: Option<u32>,
    pub warning_threshold_secs: u64,
    pub sliding_threshold_percent: u8,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            token_lifetime_minutes: None,
            warning_threshold_secs: DEFAULT_WARNING_THRESHOLD_SECS,
            sliding_threshold_percent: DEFAULT_SLIDING_THRESHOLD_PERCENT,
        }
    }
}

impl SessionPolicy {
    pub fn from_props(props: &EnvironmentProps) -> Self {
        let defaults = Self::default();
        Self {
            token_lifetime_minutes: props.jwt_access_token_expiration_minutes.filter(|m| *m > 0),
            warning_threshold_secs: props
                .warning_threshold_seconds
                .unwrap_or(defaults.warning_threshold_secs),
            sliding_threshold_percent: props
                .sliding_threshold_percent
                .map(|p| p.min(100))
                .unwrap_or(defaults.sliding_threshold_percent),
        }
    }

    pub fn with_lifetime(minutes: u32) -> Self {
        Self { token_lifetime_minutes: Some(minutes).filter(|m| *m > 0), ..Self::default() }
    }

    /// Replace the lifetime when an explicit override is given.
    pub fn with_lifetime_override(mut self, minutes: Option<u32>) -> Self {
        if let Some(m) = minutes.filter(|m| *m > 0) {
            self.token_lifetime_minutes = Some(m);
        }
        self
    }

    pub fn is_ready(&self) -> bool {
        self.token_lifetime_minutes.is_some()
    }

    pub fn lifetime_secs(&self) -> Option<u64> {
        self.token_lifetime_minutes.map(|m| u64::from(m) * 60)
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime_secs().map(Duration::from_secs)
    }

    /// Remaining-seconds ceiling below which an outbound request triggers a
    /// preemptive refresh.
    pub fn sliding_window_secs(&self) -> Option<u64> {
        self.lifetime_secs().map(|secs| secs * u64::from(self.sliding_threshold_percent) / 100)
    }
}

/// Loads [`EnvironmentProps`] from the runtime document, falling back to and
/// merging with the backend config endpoint.
pub struct ConfigProvider {
    http: reqwest::Client,
    api_url: Url,
    runtime_config: Option<PathBuf>,
}

impl ConfigProvider {
    pub fn new(http: reqwest::Client, api_url: Url, runtime_config: Option<PathBuf>) -> Self {
        Self { http, api_url, runtime_config }
    }

    /// Resolve the runtime configuration.
    ///
    /// - Runtime document if present, otherwise the backend endpoint.
    /// - If the token lifetime is missing, fetch it from the backend (at the
    ///   document's `apiBaseUrl` when set) and merge.
    /// - If that second fetch fails, the runtime document is returned as-is
    ///   and the session stays config-not-ready.
    pub async fn load(&self) -> anyhow::Result<EnvironmentProps> {
        let runtime = match self.runtime_config {
            Some(ref path) => match read_runtime_config(path) {
                Ok(props) => props,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "runtime config unreadable, using backend config");
                    self.fetch_backend(None).await?
                }
            },
            None => self.fetch_backend(None).await?,
        };

        if runtime.has_token_lifetime() {
            return Ok(runtime);
        }

        info!("token lifetime missing from runtime config, fetching from backend");
        match self.fetch_backend(runtime.api_base_url.as_deref()).await {
            Ok(backend) => Ok(runtime.merge_jwt(&backend)),
            Err(e) => {
                warn!(err = %e, "failed to load token settings from backend; session timer disabled");
                Ok(runtime)
            }
        }
    }

    async fn fetch_backend(&self, base: Option<&str>) -> anyhow::Result<EnvironmentProps> {
        let base = match base {
            Some(b) => Url::parse(&with_trailing_slash(b))?,
            None => self.api_url.clone(),
        };
        let url = base.join(URL_CONFIG_ENV_PROPS)?;
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("config endpoint returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

/// Read a runtime configuration document from disk.
pub fn read_runtime_config(path: &Path) -> anyhow::Result<EnvironmentProps> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Base URLs must end in `/` for [`Url::join`] to append rather than replace
/// the last path segment.
pub fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
