// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token session tracker: the access-token countdown.
//!
//! The tracker is the single writer of [`SessionState`]. Everyone else
//! subscribes to the `watch` channel and treats the state as read-only.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::policy::SessionPolicy;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Published countdown state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Absolute expiry of the current access credential. `None` means no
    /// active session.
    pub token_expires_at: Option<Instant>,
    pub remaining_secs: u64,
    pub is_expiring_soon: bool,
    pub is_expired: bool,
}

/// Exactly one of these holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Inactive,
    Active,
    Expired,
}

impl SessionState {
    pub fn inactive() -> Self {
        Self::default()
    }

    /// State published by a reset: full lifetime, nothing pending.
    pub fn fresh(expires_at: Instant, lifetime_secs: u64) -> Self {
        Self {
            token_expires_at: Some(expires_at),
            remaining_secs: lifetime_secs,
            is_expiring_soon: false,
            is_expired: false,
        }
    }

    /// Recompute the countdown for `now`. Remaining time is floored to whole
    /// seconds and never negative.
    pub fn at(expires_at: Instant, now: Instant, warning_threshold_secs: u64) -> Self {
        let remaining_secs = expires_at.saturating_duration_since(now).as_secs();
        Self {
            token_expires_at: Some(expires_at),
            remaining_secs,
            is_expiring_soon: remaining_secs > 0 && remaining_secs <= warning_threshold_secs,
            is_expired: remaining_secs == 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.token_expires_at.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.token_expires_at, self.is_expired) {
            (None, _) => SessionPhase::Inactive,
            (Some(_), false) => SessionPhase::Active,
            (Some(_), true) => SessionPhase::Expired,
        }
    }
}

/// Format seconds as `MM:SS`.
pub fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[derive(Debug, Default)]
struct TrackerInner {
    tick: Option<CancellationToken>,
    /// Bumped when a session starts or ends; refresh results captured under
    /// an older generation are stale.
    generation: u64,
    expiry_reported: bool,
}

/// Owns the countdown and its 1-second tick task.
pub struct SessionTracker {
    state_tx: watch::Sender<SessionState>,
    policy: watch::Receiver<SessionPolicy>,
    events: mpsc::Sender<SessionEvent>,
    inner: Mutex<TrackerInner>,
    tick_interval: Duration,
    shutdown: CancellationToken,
}

impl SessionTracker {
    pub fn new(
        policy: watch::Receiver<SessionPolicy>,
        events: mpsc::Sender<SessionEvent>,
        tick_interval: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::inactive());
        Arc::new(Self {
            state_tx,
            policy,
            events,
            inner: Mutex::new(TrackerInner::default()),
            tick_interval,
            shutdown,
        })
    }

    /// Begin a new session countdown.
    ///
    /// Fails with [`SessionError::ConfigNotReady`] if the token lifetime has
    /// not been loaded. Nothing is retried; whoever supplies the config must
    /// call again once it arrives.
    pub fn start_session(self: &Arc<Self>) -> Result<(), SessionError> {
        self.arm(true)
    }

    /// Restart the countdown from the full lifetime (after a refresh).
    pub fn reset_timer(self: &Arc<Self>) -> Result<(), SessionError> {
        self.arm(false)
    }

    /// Reset only if the session that requested a refresh is still the
    /// current one. Returns `false` for stale results.
    pub fn reset_if_current(self: &Arc<Self>, generation: u64) -> bool {
        let policy = *self.policy.borrow();
        let Some(lifetime) = policy.lifetime() else {
            return false;
        };
        let mut inner = self.inner.lock();
        if inner.generation != generation || !self.state_tx.borrow().is_active() {
            return false;
        }
        self.arm_locked(&mut inner, lifetime);
        true
    }

    fn arm(self: &Arc<Self>, new_session: bool) -> Result<(), SessionError> {
        let policy = *self.policy.borrow();
        let Some(lifetime) = policy.lifetime() else {
            warn!("cannot start session timer: token lifetime not loaded yet");
            return Err(SessionError::ConfigNotReady);
        };
        let mut inner = self.inner.lock();
        if new_session {
            inner.generation += 1;
        }
        self.arm_locked(&mut inner, lifetime);
        Ok(())
    }

    fn arm_locked(self: &Arc<Self>, inner: &mut TrackerInner, lifetime: Duration) {
        let cancel = self.shutdown.child_token();
        if let Some(prev) = inner.tick.replace(cancel.clone()) {
            prev.cancel();
        }
        inner.expiry_reported = false;

        let expires_at = Instant::now() + lifetime;
        self.state_tx.send_replace(SessionState::fresh(expires_at, lifetime.as_secs()));
        debug!(lifetime_secs = lifetime.as_secs(), generation = inner.generation, "session timer armed");

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.run_ticks(cancel).await;
        });
    }

    /// Cancel the tick and publish the inactive state.
    ///
    /// Idempotent. Returns `true` if a session was active, which makes the
    /// caller the one responsible for any terminal follow-up.
    pub fn stop_session(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(tick) = inner.tick.take() {
            tick.cancel();
        }
        inner.expiry_reported = false;
        let was_active = self.state_tx.borrow().is_active();
        if was_active {
            inner.generation += 1;
            self.state_tx.send_replace(SessionState::inactive());
            info!("session timer stopped");
        }
        was_active
    }

    async fn run_ticks(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer =
            tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            for event in self.tick(&cancel) {
                if self.events.send(event).await.is_err() {
                    debug!("session event receiver closed");
                    return;
                }
            }
        }
    }

    /// One countdown step. Reads the expiry from the published state so a
    /// concurrent reset is always observed.
    fn tick(&self, cancel: &CancellationToken) -> Vec<SessionEvent> {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return Vec::new();
        }
        let prev = *self.state_tx.borrow();
        let Some(expires_at) = prev.token_expires_at else {
            return Vec::new();
        };

        let threshold = self.policy.borrow().warning_threshold_secs;
        let next = SessionState::at(expires_at, Instant::now(), threshold);
        self.state_tx.send_replace(next);

        let mut events = Vec::new();
        if next.is_expiring_soon && !prev.is_expiring_soon {
            info!(remaining_secs = next.remaining_secs, "session expiring soon");
            events.push(SessionEvent::ExpiringSoon { remaining_secs: next.remaining_secs });
        }
        if next.is_expired && !inner.expiry_reported {
            inner.expiry_reported = true;
            info!("session token expired");
            events.push(SessionEvent::Expired);
        }
        events
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_timer_active(&self) -> bool {
        self.snapshot().is_active()
    }

    pub fn lifetime_minutes(&self) -> Option<u32> {
        self.policy.borrow().token_lifetime_minutes
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn formatted_remaining(&self) -> String {
        format_remaining(self.snapshot().remaining_secs)
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
