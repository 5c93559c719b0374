// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight session refresh.
//!
//! At most one refresh call is in flight. Overlapping callers subscribe to
//! the in-flight cell and all observe the same outcome. The refresh runs in
//! its own task, so a caller that gives up does not cancel it; a result that
//! arrives after the session changed is discarded via the tracker generation.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::error::SessionError;
use crate::event::LogoutReason;
use crate::policy::SessionPolicy;
use crate::teardown::Teardown;
use crate::tracker::{SessionState, SessionTracker};

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Preemptive, from an outbound request inside the sliding window.
    Sliding,
    /// An API call came back 401.
    Reactive,
    /// The user chose to extend from the expiry prompt.
    Extend,
}

impl RefreshKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sliding => "sliding",
            Self::Reactive => "reactive",
            Self::Extend => "extend",
        }
    }
}

pub type RefreshOutcome = Result<(), SessionError>;

type InFlight = watch::Receiver<Option<RefreshOutcome>>;

pub struct RefreshCoordinator {
    backend: Arc<dyn AuthBackend>,
    tracker: Arc<SessionTracker>,
    teardown: Arc<Teardown>,
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshCoordinator {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        tracker: Arc<SessionTracker>,
        teardown: Arc<Teardown>,
    ) -> Arc<Self> {
        Arc::new(Self { backend, tracker, teardown, in_flight: Mutex::new(None) })
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Refresh the session, or join the refresh already in flight.
    ///
    /// - `Ok(())`: the backend accepted the refresh.
    /// - `Err(AuthExpired)`: re-authentication required; the session has
    ///   been torn down.
    /// - `Err(Transient)`: the refresh failed; the session is untouched.
    pub async fn ensure_refreshed(self: &Arc<Self>, kind: RefreshKind) -> RefreshOutcome {
        let mut rx = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(rx) => {
                    debug!(kind = kind.as_str(), "joining in-flight refresh");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    let generation = self.tracker.generation();
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move {
                        coordinator.run(kind, generation, tx).await;
                    });
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(published) => published.clone().unwrap_or_else(|| Err(abandoned())),
            Err(_) => Err(abandoned()),
        };
        outcome
    }

    async fn run(
        self: Arc<Self>,
        kind: RefreshKind,
        generation: u64,
        tx: watch::Sender<Option<RefreshOutcome>>,
    ) {
        let _clear = ClearInFlight(&self.in_flight);
        debug!(kind = kind.as_str(), generation, "refreshing session");

        let outcome = match self.backend.refresh().await {
            Ok(resp) if resp.requires_reauth => self.reauth_required(generation).await,
            Ok(resp) if resp.success => {
                if self.tracker.reset_if_current(generation) {
                    info!(kind = kind.as_str(), "session refreshed");
                } else {
                    debug!(kind = kind.as_str(), generation, "discarding stale refresh result");
                }
                Ok(())
            }
            Ok(_) => {
                warn!(kind = kind.as_str(), "refresh rejected by backend");
                Err(SessionError::Transient("refresh rejected".into()))
            }
            Err(SessionError::AuthExpired) => self.reauth_required(generation).await,
            Err(e) => {
                warn!(kind = kind.as_str(), err = %e, "session refresh failed");
                Err(e)
            }
        };

        // Publish before the guard clears the slot, so nobody who joined
        // this refresh misses its result.
        tx.send_replace(Some(outcome));
    }

    async fn reauth_required(&self, generation: u64) -> RefreshOutcome {
        if self.tracker.generation() == generation {
            warn!("refresh requires re-authentication");
            self.teardown.terminate(LogoutReason::ReauthRequired).await;
        } else {
            debug!(generation, "ignoring re-auth demand for a finished session");
        }
        Err(SessionError::AuthExpired)
    }
}

struct ClearInFlight<'a>(&'a Mutex<Option<InFlight>>);

impl Drop for ClearInFlight<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

fn abandoned() -> SessionError {
    SessionError::Transient("refresh abandoned".into())
}

/// Sliding-expiration rule, evaluated per outbound request: refresh once the
/// remaining time drops into the last `sliding_threshold_percent` of the
/// lifetime.
pub fn sliding_refresh_due(state: &SessionState, policy: &SessionPolicy, refreshing: bool) -> bool {
    let Some(window) = policy.sliding_window_secs() else {
        return false;
    };
    state.is_active() && state.remaining_secs > 0 && state.remaining_secs <= window && !refreshing
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
