// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle detection. A coarse backstop for the countdown's own warning: if the
//! user has been idle for a full token lifetime and the session is already in
//! the warning band, ask for the prompt again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::SessionEvent;
use crate::policy::SessionPolicy;
use crate::tracker::SessionState;

pub const INACTIVITY_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// User interactions that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointerDown => "pointer_down",
            Self::KeyDown => "key_down",
            Self::Scroll => "scroll",
            Self::TouchStart => "touch_start",
        }
    }
}

pub struct InactivityMonitor {
    last_activity: Mutex<Instant>,
    state: watch::Receiver<SessionState>,
    policy: watch::Receiver<SessionPolicy>,
    events: mpsc::Sender<SessionEvent>,
}

impl InactivityMonitor {
    pub fn new(
        state: watch::Receiver<SessionState>,
        policy: watch::Receiver<SessionPolicy>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self { last_activity: Mutex::new(Instant::now()), state, policy, events })
    }

    /// Last write wins.
    pub fn record(&self, kind: ActivityKind) {
        trace!(kind = kind.as_str(), "user activity");
        self.touch();
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn should_warn_now(&self) -> bool {
        let state = *self.state.borrow();
        let policy = *self.policy.borrow();
        should_warn(self.idle_for(), &state, &policy)
    }

    /// Start the poll loop. Runs until `shutdown` is cancelled, independent of
    /// whether a session is active.
    pub fn spawn(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run(interval, shutdown).await })
    }

    async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            if !self.should_warn_now() {
                continue;
            }
            debug!(idle_secs = self.idle_for().as_secs(), "idle in warning band");
            if self.events.send(SessionEvent::IdleWarning).await.is_err() {
                debug!("session event receiver closed");
                break;
            }
        }
    }
}

/// Idle for at least one token lifetime, with an active session already in
/// the warning band.
pub fn should_warn(idle: Duration, state: &SessionState, policy: &SessionPolicy) -> bool {
    let Some(lifetime) = policy.lifetime() else {
        return false;
    };
    state.is_active()
        && !state.is_expired
        && idle >= lifetime
        && state.remaining_secs <= policy.warning_threshold_secs
}

#[cfg(test)]
#[path = "inactivity_tests.rs"]
mod tests;
