// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal surface: the expiry dialog on stderr and line input on stdin.

use std::io::Write;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::inactivity::ActivityKind;
use crate::keeper::SessionKeeper;
use crate::prompt::{Decision, DialogHost, ExpiryPrompt};
use crate::tracker::format_remaining;

/// Map a typed answer onto a dialog decision.
pub fn parse_answer(line: &str) -> Option<Decision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "e" | "extend" => Some(Decision::Extend),
        "l" | "logout" => Some(Decision::Logout),
        _ => None,
    }
}

/// [`DialogHost`] that renders the countdown on stderr and takes its answer
/// from [`answer`](Self::answer).
#[derive(Default)]
pub struct TerminalDialog {
    pending: Mutex<Option<oneshot::Sender<Decision>>>,
}

impl TerminalDialog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Feed one input line to the open dialog. Returns `true` if the line was
    /// taken as the answer.
    pub fn answer(&self, line: &str) -> bool {
        let Some(decision) = parse_answer(line) else {
            return false;
        };
        match self.pending.lock().take() {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

fn render(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = write!(err, "\r{line}");
    let _ = err.flush();
}

impl DialogHost for TerminalDialog {
    fn open(&self, prompt: ExpiryPrompt) -> BoxFuture<'static, Decision> {
        let (tx, mut rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        let mut countdown = prompt.countdown;

        Box::pin(async move {
            loop {
                let remaining = format_remaining(countdown.borrow_and_update().remaining_secs);
                render(&format!("Session expires in {remaining}. [e]xtend or [l]ogout? "));
                tokio::select! {
                    answer = &mut rx => match answer {
                        Ok(decision) => {
                            render(&format!("{}\n", decision.as_str()));
                            return decision;
                        }
                        // Dismissed; the caller has already moved on.
                        Err(_) => return future::pending().await,
                    },
                    changed = countdown.changed() => {
                        if changed.is_err() {
                            return future::pending().await;
                        }
                    }
                }
            }
        })
    }

    fn close_all(&self) {
        if self.pending.lock().take().is_some() {
            render("session warning closed\n");
        }
    }
}

/// Read stdin line by line. Every line counts as key-down activity; lines are
/// offered to the dialog first, and `logout` outside a dialog logs out.
pub fn spawn_input(
    keeper: Arc<SessionKeeper>,
    dialog: Arc<TerminalDialog>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(l)) => l,
                    Ok(None) | Err(_) => break,
                },
            };
            keeper.record_activity(ActivityKind::KeyDown);
            if dialog.answer(&line) {
                continue;
            }
            match line.trim() {
                "logout" => {
                    keeper.logout().await;
                }
                "status" => {
                    let state = keeper.state();
                    render(&format!(
                        "remaining {} (expiring soon: {})\n",
                        format_remaining(state.remaining_secs),
                        state.is_expiring_soon
                    ));
                }
                _ => {}
            }
        }
        debug!("stdin closed");
    })
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
