// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events flowing from the countdown and idle pollers to the supervisor.

use serde::{Deserialize, Serialize};

/// Emitted by the tracker tick and the inactivity poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Remaining time just entered the warning band.
    ExpiringSoon { remaining_secs: u64 },
    /// Remaining time reached zero. Emitted once per expiry.
    Expired,
    /// The user has been idle for a full token lifetime while the session
    /// sits in the warning band.
    IdleWarning,
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    Expired,
    ReauthRequired,
    UserRequested,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ReauthRequired => "reauth_required",
            Self::UserRequested => "user_requested",
        }
    }
}
