// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry warning prompt.
//!
//! `Closed -> Open -> {Extend, Logout, TimedOut}`. At most one prompt is open
//! at a time; the tick path and the idle path both funnel through
//! [`WarningPrompt::claim`], whose slot is the re-entrancy guard. The prompt
//! only lives inside the warning band: a reset from any refresh path
//! dismisses it.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::tracker::{format_remaining, SessionState};

/// What the user chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Extend,
    Logout,
    /// Countdown reached zero with no answer. Treated like a decline.
    TimedOut,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extend => "extend",
            Self::Logout => "logout",
            Self::TimedOut => "timed_out",
        }
    }
}

/// How a presented prompt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Decided(Decision),
    /// Closed from outside (session stopped or torn down).
    Dismissed,
}

/// Request handed to the dialog host.
///
/// The countdown is the tracker's own state, so the host renders the same
/// remaining time the tracker computes rather than running a second timer.
pub struct ExpiryPrompt {
    pub countdown: watch::Receiver<SessionState>,
}

impl ExpiryPrompt {
    pub fn remaining_secs(&self) -> u64 {
        self.countdown.borrow().remaining_secs
    }

    pub fn formatted(&self) -> String {
        format_remaining(self.remaining_secs())
    }
}

/// UI surface able to show the expiry dialog.
///
/// Object-safe for use as `Arc<dyn DialogHost>`.
pub trait DialogHost: Send + Sync + 'static {
    /// Show the dialog and resolve with the user's choice.
    fn open(&self, prompt: ExpiryPrompt) -> BoxFuture<'static, Decision>;

    /// Dismiss anything currently shown.
    fn close_all(&self);
}

/// Re-entrancy-guarded wrapper around a [`DialogHost`].
pub struct WarningPrompt {
    host: Arc<dyn DialogHost>,
    slot: Mutex<PromptSlot>,
}

#[derive(Default)]
struct PromptSlot {
    next_id: u64,
    open: Option<(u64, CancellationToken)>,
}

impl WarningPrompt {
    pub fn new(host: Arc<dyn DialogHost>) -> Arc<Self> {
        Arc::new(Self { host, slot: Mutex::new(PromptSlot::default()) })
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().open.is_some()
    }

    /// Take the prompt slot. `None` when another prompt holds it. The slot is
    /// released when the returned claim is dropped, so a caller can keep the
    /// prompt up across follow-up work such as an extend refresh.
    pub fn claim(&self) -> Option<PromptClaim<'_>> {
        let mut slot = self.slot.lock();
        if slot.open.is_some() {
            debug!("expiry prompt already open");
            return None;
        }
        slot.next_id += 1;
        let id = slot.next_id;
        let cancel = CancellationToken::new();
        slot.open = Some((id, cancel.clone()));
        Some(PromptClaim { prompt: self, id, cancel })
    }

    /// Open the prompt unless one is already open.
    ///
    /// Returns `None` when another prompt holds the slot. Otherwise resolves
    /// with the user's decision, `TimedOut` when the countdown reaches zero,
    /// or `Dismissed` when [`close`](Self::close) is called or the countdown
    /// leaves the warning band.
    pub async fn present(&self, countdown: watch::Receiver<SessionState>) -> Option<PromptOutcome> {
        let claim = self.claim()?;
        Some(self.show(&claim, countdown).await)
    }

    /// Show the dialog under an existing claim.
    pub async fn show(
        &self,
        claim: &PromptClaim<'_>,
        countdown: watch::Receiver<SessionState>,
    ) -> PromptOutcome {
        if claim.is_dismissed() {
            return PromptOutcome::Dismissed;
        }
        let prompt = ExpiryPrompt { countdown: countdown.clone() };
        info!(remaining = %prompt.formatted(), "showing session expiry warning");

        let mut watch_end = countdown;
        let outcome = tokio::select! {
            _ = claim.cancel.cancelled() => PromptOutcome::Dismissed,
            decision = self.host.open(prompt) => PromptOutcome::Decided(decision),
            end = countdown_end(&mut watch_end) => {
                self.host.close_all();
                match end {
                    CountdownEnd::Expired => PromptOutcome::Decided(Decision::TimedOut),
                    CountdownEnd::LeftBand => PromptOutcome::Dismissed,
                }
            }
        };
        debug!(?outcome, "expiry prompt closed");
        outcome
    }

    /// Dismiss the open prompt, if any.
    pub fn close(&self) {
        let open = self.slot.lock().open.take();
        if let Some((_, cancel)) = open {
            cancel.cancel();
            self.host.close_all();
        }
    }
}

/// Ownership of the prompt slot; see [`WarningPrompt::claim`].
pub struct PromptClaim<'a> {
    prompt: &'a WarningPrompt,
    id: u64,
    cancel: CancellationToken,
}

impl PromptClaim<'_> {
    /// The prompt was closed from outside while this claim was held.
    pub fn is_dismissed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PromptClaim<'_> {
    fn drop(&mut self) {
        let mut slot = self.prompt.slot.lock();
        if slot.open.as_ref().is_some_and(|(open_id, _)| *open_id == self.id) {
            slot.open = None;
        }
    }
}

enum CountdownEnd {
    Expired,
    /// A refresh from another path lifted the countdown out of the band.
    LeftBand,
}

/// Resolves once the countdown reaches zero or a reset lifts it out of the
/// warning band. A stopped session never resolves here;
/// [`WarningPrompt::close`] dismisses the prompt instead.
async fn countdown_end(rx: &mut watch::Receiver<SessionState>) -> CountdownEnd {
    let ended = |s: &SessionState| s.is_expired || (s.is_active() && !s.is_expiring_soon);
    let expired = match rx.wait_for(ended).await {
        Ok(state) => Some(state.is_expired),
        Err(_) => None,
    };
    match expired {
        Some(true) => CountdownEnd::Expired,
        Some(false) => CountdownEnd::LeftBand,
        None => future::pending().await,
    }
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
