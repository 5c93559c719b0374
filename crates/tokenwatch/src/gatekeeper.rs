// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound API request path.
//!
//! Every API call goes through [`RequestGatekeeper::execute`], which refreshes
//! preemptively inside the sliding window and reactively on 401, retrying the
//! request once. Callers see the final response and never learn a refresh
//! happened.

use std::sync::Arc;

use reqwest::{Method, Request, RequestBuilder, Response, StatusCode, Url};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::CsrfStore;
use crate::error::SessionError;
use crate::policy::SessionPolicy;
use crate::refresh::{sliding_refresh_due, RefreshCoordinator, RefreshKind};
use crate::tracker::SessionTracker;

pub struct RequestGatekeeper {
    http: reqwest::Client,
    tracker: Arc<SessionTracker>,
    coordinator: Arc<RefreshCoordinator>,
    policy: watch::Receiver<SessionPolicy>,
    csrf: Arc<CsrfStore>,
}

impl RequestGatekeeper {
    pub fn new(
        http: reqwest::Client,
        tracker: Arc<SessionTracker>,
        coordinator: Arc<RefreshCoordinator>,
        policy: watch::Receiver<SessionPolicy>,
        csrf: Arc<CsrfStore>,
    ) -> Self {
        Self { http, tracker, coordinator, policy, csrf }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, SessionError> {
        let request = builder.build().map_err(request_error)?;
        self.execute(request).await
    }

    pub async fn execute(&self, mut request: Request) -> Result<Response, SessionError> {
        if is_auth_endpoint(request.url()) {
            return self.http.execute(request).await.map_err(request_error);
        }

        self.attach_csrf(&mut request);
        self.slide().await?;

        let replay = request.try_clone();
        let resp = self.http.execute(request).await.map_err(request_error)?;
        match resp.status() {
            StatusCode::UNAUTHORIZED => {}
            StatusCode::FORBIDDEN => {
                warn!(url = %resp.url(), "access denied");
                return Ok(resp);
            }
            _ => return Ok(resp),
        }

        debug!(url = %resp.url(), "request unauthorized, refreshing session");
        match self.coordinator.ensure_refreshed(RefreshKind::Reactive).await {
            Ok(()) => {}
            Err(SessionError::AuthExpired) => return Err(SessionError::AuthExpired),
            Err(e) => {
                warn!(err = %e, "refresh after 401 failed");
                return Err(SessionError::AuthExpired);
            }
        }

        let Some(mut retry) = replay else {
            debug!(url = %resp.url(), "request body not replayable, returning 401");
            return Ok(resp);
        };
        self.attach_csrf(&mut retry);
        self.http.execute(retry).await.map_err(request_error)
    }

    /// Preemptive refresh when the countdown is inside the sliding window.
    /// Only a re-auth demand stops the request; a transient failure lets it
    /// through, since the current token may still be valid.
    async fn slide(&self) -> Result<(), SessionError> {
        let state = self.tracker.snapshot();
        let policy = *self.policy.borrow();
        if !sliding_refresh_due(&state, &policy, self.coordinator.is_refreshing()) {
            return Ok(());
        }

        debug!(remaining_secs = state.remaining_secs, "sliding refresh before request");
        match self.coordinator.ensure_refreshed(RefreshKind::Sliding).await {
            Err(SessionError::AuthExpired) => Err(SessionError::AuthExpired),
            Err(e) => {
                debug!(err = %e, "sliding refresh failed, sending anyway");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn attach_csrf(&self, request: &mut Request) {
        if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
            return;
        }
        let Some(token) = self.csrf.get() else {
            return;
        };
        let name = reqwest::header::HeaderName::try_from(token.header());
        let value = reqwest::header::HeaderValue::try_from(token.token.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().insert(name, value);
            }
            _ => warn!("csrf token is not a valid header, skipping"),
        }
    }
}

/// Authentication endpoints bypass the gatekeeper so a refresh can never
/// recurse into another refresh.
pub fn is_auth_endpoint(url: &Url) -> bool {
    url.path().contains("/auth/")
}

fn request_error(err: reqwest::Error) -> SessionError {
    SessionError::Request(err.to_string())
}

#[cfg(test)]
#[path = "gatekeeper_tests.rs"]
mod tests;
