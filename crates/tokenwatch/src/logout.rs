// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::AuthBackend;
use crate::event::LogoutReason;
use crate::teardown::LogoutHandler;
use crate::user_store::UserStore;

/// Logs out against the backend, forgets the local user, and signals the host
/// through `logged_out` so it can return to its login surface.
pub struct LocalLogout {
    backend: Arc<dyn AuthBackend>,
    users: UserStore,
    logged_out: CancellationToken,
}

impl LocalLogout {
    pub fn new(backend: Arc<dyn AuthBackend>, users: UserStore, logged_out: CancellationToken) -> Self {
        Self { backend, users, logged_out }
    }

    pub fn logged_out(&self) -> CancellationToken {
        self.logged_out.clone()
    }

    async fn run(&self, reason: LogoutReason) {
        // Invalidates the server-side session and its cookies.
        if let Err(e) = self.backend.logout().await {
            warn!(err = %e, "backend logout failed");
        }
        if let Err(e) = self.users.clear() {
            warn!(err = %e, "failed to clear current user");
        }
        // Old CSRF token died with the session.
        if let Err(e) = self.backend.fetch_csrf().await {
            warn!(err = %e, "failed to fetch csrf token after logout");
        }
        info!(reason = reason.as_str(), "logged out");
        self.logged_out.cancel();
    }
}

impl LogoutHandler for LocalLogout {
    fn logout(&self, reason: LogoutReason) -> BoxFuture<'_, ()> {
        Box::pin(self.run(reason))
    }
}

#[cfg(test)]
#[path = "logout_tests.rs"]
mod tests;
