// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, info};

use crate::event::LogoutReason;
use crate::prompt::WarningPrompt;
use crate::tracker::SessionTracker;

/// Clears local session state and sends the user to a login surface.
///
/// Object-safe for use as `Arc<dyn LogoutHandler>`. Implementations should
/// tolerate being called twice, though [`Teardown`] only calls once per
/// session.
pub trait LogoutHandler: Send + Sync + 'static {
    fn logout(&self, reason: LogoutReason) -> BoxFuture<'_, ()>;
}

/// The single terminal transition: stop the countdown, dismiss the prompt,
/// hand off to the [`LogoutHandler`].
pub struct Teardown {
    tracker: Arc<SessionTracker>,
    prompt: Arc<WarningPrompt>,
    logout: Arc<dyn LogoutHandler>,
}

impl Teardown {
    pub fn new(
        tracker: Arc<SessionTracker>,
        prompt: Arc<WarningPrompt>,
        logout: Arc<dyn LogoutHandler>,
    ) -> Self {
        Self { tracker, prompt, logout }
    }

    /// Tear the current session down. Returns `false` if there was no active
    /// session (already torn down, or never started).
    pub async fn terminate(&self, reason: LogoutReason) -> bool {
        if !self.tracker.stop_session() {
            debug!(reason = reason.as_str(), "no active session to tear down");
            return false;
        }
        self.prompt.close();
        info!(reason = reason.as_str(), "session terminated");
        self.logout.logout(reason).await;
        true
    }
}

#[cfg(test)]
#[path = "teardown_tests.rs"]
mod tests;
