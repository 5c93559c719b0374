// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the session-lifetime core.
///
/// Only [`SessionError::AuthExpired`] is fatal to a session. Everything else
/// is recovered locally: logged, and the session is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Token lifetime has not been supplied by the config provider yet.
    ConfigNotReady,
    /// The backend demands re-authentication (401 or `requiresReauth`).
    AuthExpired,
    /// Network or server failure on a refresh or auth call.
    Transient(String),
    /// The outbound API request itself could not be built or sent.
    Request(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigNotReady => "CONFIG_NOT_READY",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::Transient(_) => "TRANSIENT",
            Self::Request(_) => "REQUEST",
        }
    }

    /// Whether this error ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotReady => f.write_str("token lifetime not configured yet"),
            Self::AuthExpired => f.write_str("session expired; re-authentication required"),
            Self::Transient(msg) => write!(f, "transient failure: {msg}"),
            Self::Request(msg) => write!(f, "request failed: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            return Self::AuthExpired;
        }
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
