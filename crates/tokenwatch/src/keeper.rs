// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root for the session-lifetime core.
//!
//! [`SessionKeeper::new`] builds the components in dependency order (tracker,
//! prompt, teardown, coordinator, inactivity monitor, gatekeeper) and spawns
//! the supervisor that turns [`SessionEvent`]s into prompts and teardowns.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, CsrfStore};
use crate::error::SessionError;
use crate::event::{LogoutReason, SessionEvent};
use crate::gatekeeper::RequestGatekeeper;
use crate::inactivity::{ActivityKind, InactivityMonitor, INACTIVITY_POLL_INTERVAL};
use crate::policy::SessionPolicy;
use crate::prompt::{Decision, DialogHost, PromptOutcome, WarningPrompt};
use crate::refresh::{RefreshCoordinator, RefreshKind};
use crate::teardown::{LogoutHandler, Teardown};
use crate::tracker::{SessionState, SessionTracker, TICK_INTERVAL};

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub tick: Duration,
    pub inactivity_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self { tick: TICK_INTERVAL, inactivity_poll: INACTIVITY_POLL_INTERVAL }
    }
}

/// Collaborators supplied by the host.
pub struct KeeperParts {
    pub http: reqwest::Client,
    pub backend: Arc<dyn AuthBackend>,
    pub logout: Arc<dyn LogoutHandler>,
    pub dialog: Arc<dyn DialogHost>,
    pub csrf: Arc<CsrfStore>,
    pub timings: Timings,
}

pub struct SessionKeeper {
    policy_tx: watch::Sender<SessionPolicy>,
    tracker: Arc<SessionTracker>,
    prompt: Arc<WarningPrompt>,
    teardown: Arc<Teardown>,
    coordinator: Arc<RefreshCoordinator>,
    inactivity: Arc<InactivityMonitor>,
    gatekeeper: RequestGatekeeper,
    /// A start was refused for lack of config; retried when a ready policy
    /// arrives.
    start_pending: Mutex<bool>,
    shutdown: CancellationToken,
}

impl SessionKeeper {
    pub fn new(parts: KeeperParts, shutdown: CancellationToken) -> Arc<Self> {
        let (policy_tx, policy_rx) = watch::channel(SessionPolicy::default());
        let (event_tx, event_rx) = mpsc::channel(64);

        let tracker = SessionTracker::new(
            policy_rx.clone(),
            event_tx.clone(),
            parts.timings.tick,
            shutdown.clone(),
        );
        let prompt = WarningPrompt::new(parts.dialog);
        let teardown =
            Arc::new(Teardown::new(Arc::clone(&tracker), Arc::clone(&prompt), parts.logout));
        let coordinator =
            RefreshCoordinator::new(parts.backend, Arc::clone(&tracker), Arc::clone(&teardown));
        let inactivity = InactivityMonitor::new(tracker.subscribe(), policy_rx.clone(), event_tx);
        let gatekeeper = RequestGatekeeper::new(
            parts.http,
            Arc::clone(&tracker),
            Arc::clone(&coordinator),
            policy_rx,
            parts.csrf,
        );

        let keeper = Arc::new(Self {
            policy_tx,
            tracker,
            prompt,
            teardown,
            coordinator,
            inactivity,
            gatekeeper,
            start_pending: Mutex::new(false),
            shutdown: shutdown.clone(),
        });

        keeper.inactivity.spawn(parts.timings.inactivity_poll, shutdown);
        let supervisor = Arc::clone(&keeper);
        tokio::spawn(async move { supervisor.supervise(event_rx).await });
        keeper
    }

    /// Start the countdown after a successful login.
    ///
    /// Without a token lifetime this returns
    /// [`SessionError::ConfigNotReady`] and the start is deferred until
    /// [`apply_policy`](Self::apply_policy) supplies one.
    pub fn start_session(&self) -> Result<(), SessionError> {
        self.inactivity.touch();
        let mut pending = self.start_pending.lock();
        match self.tracker.start_session() {
            Ok(()) => {
                *pending = false;
                info!(lifetime_minutes = ?self.tracker.lifetime_minutes(), "session started");
                Ok(())
            }
            Err(e) => {
                *pending = matches!(e, SessionError::ConfigNotReady);
                Err(e)
            }
        }
    }

    /// Stop the countdown and dismiss any prompt, without logging out.
    pub fn stop_session(&self) -> bool {
        *self.start_pending.lock() = false;
        let was_active = self.tracker.stop_session();
        self.prompt.close();
        was_active
    }

    /// User-initiated logout.
    pub async fn logout(&self) -> bool {
        *self.start_pending.lock() = false;
        self.teardown.terminate(LogoutReason::UserRequested).await
    }

    /// Publish a new policy, completing a deferred start if one is waiting.
    pub fn apply_policy(&self, policy: SessionPolicy) {
        let mut pending = self.start_pending.lock();
        info!(
            lifetime_minutes = ?policy.token_lifetime_minutes,
            warning_threshold_secs = policy.warning_threshold_secs,
            sliding_threshold_percent = policy.sliding_threshold_percent,
            "session policy updated"
        );
        self.policy_tx.send_replace(policy);

        if *pending && policy.is_ready() {
            match self.tracker.start_session() {
                Ok(()) => {
                    *pending = false;
                    info!("deferred session start completed");
                }
                Err(e) => warn!(err = %e, "deferred session start failed"),
            }
        }
    }

    pub fn record_activity(&self, kind: ActivityKind) {
        self.inactivity.record(kind);
    }

    pub fn gatekeeper(&self) -> &RequestGatekeeper {
        &self.gatekeeper
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    pub fn state(&self) -> SessionState {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tracker.subscribe()
    }

    pub fn policy(&self) -> SessionPolicy {
        *self.policy_tx.borrow()
    }

    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    pub fn is_prompt_open(&self) -> bool {
        self.prompt.is_open()
    }

    async fn supervise(self: Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(e) => e,
                    None => break,
                },
            };
            debug!(?event, "session event");

            match event {
                SessionEvent::ExpiringSoon { .. } | SessionEvent::IdleWarning => {
                    let keeper = Arc::clone(&self);
                    tokio::spawn(async move {
                        keeper.run_prompt().await;
                    });
                }
                SessionEvent::Expired => {
                    self.teardown.terminate(LogoutReason::Expired).await;
                }
            }
        }
        debug!("session supervisor stopped");
    }

    /// Show the expiry prompt and act on the answer. `None` if no session is
    /// counting down or a prompt is already open.
    ///
    /// The prompt stays claimed while an extend refresh runs. If that refresh
    /// fails transiently and the countdown is still in the warning band, the
    /// user is asked again.
    pub async fn run_prompt(&self) -> Option<PromptOutcome> {
        let state = self.tracker.snapshot();
        if !state.is_active() || state.is_expired {
            return None;
        }
        let claim = self.prompt.claim()?;

        let outcome = loop {
            let outcome = self.prompt.show(&claim, self.tracker.subscribe()).await;
            if outcome != PromptOutcome::Decided(Decision::Extend) {
                break outcome;
            }

            self.inactivity.touch();
            match self.coordinator.ensure_refreshed(RefreshKind::Extend).await {
                Ok(()) => info!("session extended"),
                // Teardown already ran.
                Err(SessionError::AuthExpired) => {}
                Err(e) if self.tracker.snapshot().is_expiring_soon && !claim.is_dismissed() => {
                    warn!(err = %e, "could not extend session, asking again");
                    continue;
                }
                Err(e) => warn!(err = %e, "could not extend session"),
            }
            break outcome;
        };
        drop(claim);

        match outcome {
            PromptOutcome::Decided(Decision::Logout) => {
                self.teardown.terminate(LogoutReason::UserRequested).await;
            }
            PromptOutcome::Decided(Decision::TimedOut) => {
                info!("expiry warning unanswered, letting session expire");
            }
            PromptOutcome::Decided(Decision::Extend) | PromptOutcome::Dismissed => {}
        }
        Some(outcome)
    }
}

#[cfg(test)]
#[path = "keeper_tests.rs"]
mod tests;
