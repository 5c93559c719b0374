// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the session collaborators and
//! assertion helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::backend::{AuthBackend, CsrfToken, CurrentUser, RefreshResponse, SessionCheck};
use crate::error::SessionError;
use crate::event::{LogoutReason, SessionEvent};
use crate::policy::SessionPolicy;
use crate::prompt::{Decision, DialogHost, ExpiryPrompt, WarningPrompt};
use crate::refresh::RefreshCoordinator;
use crate::teardown::{LogoutHandler, Teardown};
use crate::tracker::{SessionTracker, TICK_INTERVAL};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider before building a `reqwest::Client`.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Tracker, prompt, teardown and coordinator wired over fakes.
pub struct CoreHarness {
    pub policy_tx: watch::Sender<SessionPolicy>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub tracker: Arc<SessionTracker>,
    pub dialog: Arc<ScriptedDialog>,
    pub prompt: Arc<WarningPrompt>,
    pub logout: Arc<RecordingLogout>,
    pub teardown: Arc<Teardown>,
    pub backend: Arc<FakeBackend>,
    pub coordinator: Arc<RefreshCoordinator>,
}

impl CoreHarness {
    pub fn new(policy: SessionPolicy, backend: FakeBackend) -> Self {
        let (policy_tx, policy_rx) = watch::channel(policy);
        let (event_tx, events) = mpsc::channel(64);
        let tracker =
            SessionTracker::new(policy_rx, event_tx, TICK_INTERVAL, CancellationToken::new());
        let dialog = ScriptedDialog::silent();
        let prompt = WarningPrompt::new(dialog.clone());
        let logout = RecordingLogout::new();
        let teardown =
            Arc::new(Teardown::new(Arc::clone(&tracker), Arc::clone(&prompt), logout.clone()));
        let backend = Arc::new(backend);
        let coordinator =
            RefreshCoordinator::new(backend.clone(), Arc::clone(&tracker), Arc::clone(&teardown));
        Self { policy_tx, events, tracker, dialog, prompt, logout, teardown, backend, coordinator }
    }

    pub fn with_lifetime(minutes: u32) -> Self {
        Self::new(SessionPolicy::with_lifetime(minutes), FakeBackend::new())
    }
}

/// Scripted [`AuthBackend`].
///
/// Refresh results are popped from a queue (empty queue means success). When
/// gated, every refresh waits for a permit, which lets tests pile up
/// concurrent callers before the call completes.
#[derive(Default)]
pub struct FakeBackend {
    refresh_results: Mutex<VecDeque<Result<RefreshResponse, SessionError>>>,
    gate: Option<Arc<Semaphore>>,
    session: Mutex<SessionCheck>,
    refresh_calls: AtomicU32,
    logout_calls: AtomicU32,
    csrf_calls: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block refreshes until permits are added to the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { gate: Some(Arc::clone(&gate)), ..Self::default() }, gate)
    }

    pub fn push_refresh(&self, result: Result<RefreshResponse, SessionError>) {
        self.refresh_results.lock().push_back(result);
    }

    pub fn set_session(&self, check: SessionCheck) {
        *self.session.lock() = check;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> u32 {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn csrf_calls(&self) -> u32 {
        self.csrf_calls.load(Ordering::SeqCst)
    }
}

impl AuthBackend for FakeBackend {
    fn refresh(&self) -> BoxFuture<'_, Result<RefreshResponse, SessionError>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(ref gate) = self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            let next = self.refresh_results.lock().pop_front();
            next.unwrap_or_else(|| Ok(RefreshResponse::default()))
        })
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        future::ready(Ok(())).boxed()
    }

    fn current_user(&self) -> BoxFuture<'_, Result<Option<CurrentUser>, SessionError>> {
        let user = self.session.lock().user.clone();
        future::ready(Ok(user)).boxed()
    }

    fn check_session(&self) -> BoxFuture<'_, Result<SessionCheck, SessionError>> {
        let check = self.session.lock().clone();
        future::ready(Ok(check)).boxed()
    }

    fn fetch_csrf(&self) -> BoxFuture<'_, Result<Option<CsrfToken>, SessionError>> {
        let n = self.csrf_calls.fetch_add(1, Ordering::SeqCst);
        let token = CsrfToken { token: format!("csrf-{n}"), header_name: None };
        future::ready(Ok(Some(token))).boxed()
    }
}

/// [`LogoutHandler`] that records every call.
#[derive(Default)]
pub struct RecordingLogout {
    reasons: Mutex<Vec<LogoutReason>>,
}

impl RecordingLogout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<LogoutReason> {
        self.reasons.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.reasons.lock().len()
    }
}

impl LogoutHandler for RecordingLogout {
    fn logout(&self, reason: LogoutReason) -> BoxFuture<'_, ()> {
        self.reasons.lock().push(reason);
        future::ready(()).boxed()
    }
}

/// [`DialogHost`] that answers with a fixed decision, or never answers.
pub struct ScriptedDialog {
    answer: Mutex<Option<Decision>>,
    opened: AtomicU32,
    closed: AtomicU32,
    last_remaining: Mutex<Option<u64>>,
}

impl ScriptedDialog {
    pub fn answering(decision: Decision) -> Arc<Self> {
        Arc::new(Self::with_answer(Some(decision)))
    }

    /// A dialog the user ignores.
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::with_answer(None))
    }

    fn with_answer(answer: Option<Decision>) -> Self {
        Self {
            answer: Mutex::new(answer),
            opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            last_remaining: Mutex::new(None),
        }
    }

    pub fn set_answer(&self, answer: Option<Decision>) {
        *self.answer.lock() = answer;
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remaining seconds shown when the dialog last opened.
    pub fn last_remaining(&self) -> Option<u64> {
        *self.last_remaining.lock()
    }
}

impl DialogHost for ScriptedDialog {
    fn open(&self, prompt: ExpiryPrompt) -> BoxFuture<'static, Decision> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_remaining.lock() = Some(prompt.remaining_secs());
        match *self.answer.lock() {
            Some(decision) => future::ready(decision).boxed(),
            None => future::pending().boxed(),
        }
    }

    fn close_all(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
