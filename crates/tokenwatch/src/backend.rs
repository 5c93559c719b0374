// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth backend: refresh, logout, session check and CSRF endpoints.
//!
//! These calls carry the ambient session cookies but never pass through the
//! [`RequestGatekeeper`](crate::gatekeeper::RequestGatekeeper), so a failing
//! refresh cannot recurse into another refresh.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;

pub const URL_REFRESH: &str = "api/auth/refresh";
pub const URL_LOGOUT: &str = "api/auth/logout";
pub const URL_CURRENT_USER: &str = "api/auth/user";
pub const URL_CHECK_SESSION: &str = "api/auth/session";
pub const URL_CSRF_TOKEN: &str = "api/auth/csrf";
pub const URL_CONFIG_ENV_PROPS: &str = "api/config/environmentProperties";

pub const DEFAULT_CSRF_HEADER: &str = "X-XSRF-TOKEN";

fn default_true() -> bool {
    true
}

/// Body of a refresh response. An empty 2xx body counts as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub requires_reauth: bool,
}

impl Default for RefreshResponse {
    fn default() -> Self {
        Self { success: true, requires_reauth: false }
    }
}

/// Opaque "current user" document owned by the login flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrentUser(pub serde_json::Value);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheck {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub requires_reauth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<CurrentUser>,
}

/// CSRF token as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

impl CsrfToken {
    pub fn header(&self) -> &str {
        self.header_name.as_deref().unwrap_or(DEFAULT_CSRF_HEADER)
    }
}

/// Latest CSRF token, shared between the backend (writer) and the gatekeeper.
#[derive(Debug, Default)]
pub struct CsrfStore {
    current: RwLock<Option<CsrfToken>>,
}

impl CsrfStore {
    pub fn get(&self) -> Option<CsrfToken> {
        self.current.read().clone()
    }

    pub fn set(&self, token: Option<CsrfToken>) {
        *self.current.write() = token;
    }
}

/// Auth endpoints the session core depends on.
///
/// Object-safe for use as `Arc<dyn AuthBackend>`.
pub trait AuthBackend: Send + Sync + 'static {
    fn refresh(&self) -> BoxFuture<'_, Result<RefreshResponse, SessionError>>;
    fn logout(&self) -> BoxFuture<'_, Result<(), SessionError>>;
    fn current_user(&self) -> BoxFuture<'_, Result<Option<CurrentUser>, SessionError>>;
    fn check_session(&self) -> BoxFuture<'_, Result<SessionCheck, SessionError>>;
    /// Fetch a fresh CSRF token (needed again after logout).
    fn fetch_csrf(&self) -> BoxFuture<'_, Result<Option<CsrfToken>, SessionError>>;
}

/// [`AuthBackend`] over HTTP, sharing the client's cookie jar.
pub struct HttpAuthBackend {
    http: reqwest::Client,
    base: Url,
    csrf: Arc<CsrfStore>,
}

impl HttpAuthBackend {
    pub fn new(http: reqwest::Client, base: Url, csrf: Arc<CsrfStore>) -> Self {
        Self { http, base, csrf }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.base.join(path).map_err(|e| SessionError::Request(e.to_string()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.post(url);
        match self.csrf.get() {
            Some(token) => {
                let header = token.header().to_owned();
                builder.header(header, token.token)
            }
            None => builder,
        }
    }

    async fn do_refresh(&self) -> Result<RefreshResponse, SessionError> {
        let resp = self.post(self.endpoint(URL_REFRESH)?).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SessionError::AuthExpired);
        }
        if !status.is_success() {
            return Err(SessionError::Transient(format!("refresh returned {status}")));
        }
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(RefreshResponse::default());
        }
        serde_json::from_str(&text).map_err(|e| SessionError::Transient(e.to_string()))
    }

    async fn do_logout(&self) -> Result<(), SessionError> {
        let resp = self.post(self.endpoint(URL_LOGOUT)?).send().await?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            return Err(SessionError::Transient(format!("logout returned {status}")));
        }
        Ok(())
    }

    async fn do_current_user(&self) -> Result<Option<CurrentUser>, SessionError> {
        let resp = self.http.get(self.endpoint(URL_CURRENT_USER)?).send().await?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.json().await?)),
            s => Err(SessionError::Transient(format!("current user returned {s}"))),
        }
    }

    async fn do_check_session(&self) -> Result<SessionCheck, SessionError> {
        let resp = self.http.get(self.endpoint(URL_CHECK_SESSION)?).send().await?;
        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                Ok(SessionCheck { authenticated: false, requires_reauth: true, user: None })
            }
            s if s.is_success() => Ok(resp.json().await?),
            s => Err(SessionError::Transient(format!("session check returned {s}"))),
        }
    }

    async fn do_fetch_csrf(&self) -> Result<Option<CsrfToken>, SessionError> {
        let resp = self.http.get(self.endpoint(URL_CSRF_TOKEN)?).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Transient(format!("csrf returned {status}")));
        }
        let text = resp.text().await?;
        let token = if text.trim().is_empty() {
            None
        } else {
            let parsed: CsrfToken =
                serde_json::from_str(&text).map_err(|e| SessionError::Transient(e.to_string()))?;
            Some(parsed)
        };
        debug!(present = token.is_some(), "csrf token fetched");
        self.csrf.set(token.clone());
        Ok(token)
    }
}

impl AuthBackend for HttpAuthBackend {
    fn refresh(&self) -> BoxFuture<'_, Result<RefreshResponse, SessionError>> {
        Box::pin(self.do_refresh())
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(self.do_logout())
    }

    fn current_user(&self) -> BoxFuture<'_, Result<Option<CurrentUser>, SessionError>> {
        Box::pin(self.do_current_user())
    }

    fn check_session(&self) -> BoxFuture<'_, Result<SessionCheck, SessionError>> {
        Box::pin(self.do_check_session())
    }

    fn fetch_csrf(&self) -> BoxFuture<'_, Result<Option<CsrfToken>, SessionError>> {
        Box::pin(self.do_fetch_csrf())
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
