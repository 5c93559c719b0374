// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `tokenwatch` binary against
//! the fake admissions backend.

use std::io::Write;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use tokenwatch_specs::{tokenwatch_binary, FakeAdmissions};

const TIMEOUT: Duration = Duration::from_secs(10);

fn spawn(backend: &FakeAdmissions, state_dir: &std::path::Path) -> anyhow::Result<Child> {
    let binary = tokenwatch_binary();
    anyhow::ensure!(binary.exists(), "tokenwatch binary not found at {}", binary.display());

    let child = Command::new(&binary)
        .args(["--api-url", &backend.base_url()])
        .args(["--session-cookie", "stale", "--lifetime-minutes", "15"])
        .args(["--log-format", "text", "--log-level", "warn"])
        .env("TOKENWATCH_STATE_DIR", state_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(child)
}

async fn wait_exit(child: &mut Child) -> anyhow::Result<ExitStatus> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if tokio::time::Instant::now() > deadline {
            let _ = child.kill();
            anyhow::bail!("tokenwatch did not exit within {TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn exits_when_not_logged_in() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    backend.set_authenticated(false);
    let dir = tempfile::tempdir()?;

    let mut child = spawn(&backend, dir.path())?;
    let status = wait_exit(&mut child).await?;

    assert_eq!(status.code(), Some(1));
    assert_eq!(backend.state().logout_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn logout_command_ends_the_session() -> anyhow::Result<()> {
    let backend = FakeAdmissions::start().await?;
    let dir = tempfile::tempdir()?;

    let mut child = spawn(&backend, dir.path())?;
    // Persisted user marks the session as started.
    let user_file = dir.path().join("current-user.json");
    tokenwatch_specs::wait_until(TIMEOUT, || user_file.exists()).await?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(b"logout\n")?;
        stdin.flush()?;
    }
    let status = wait_exit(&mut child).await?;

    assert_eq!(status.code(), Some(0));
    assert_eq!(backend.state().logout_calls(), 1);
    assert!(!user_file.exists());
    Ok(())
}

#[tokio::test]
async fn invalid_flags_exit_with_usage_error() -> anyhow::Result<()> {
    let binary = tokenwatch_binary();
    anyhow::ensure!(binary.exists(), "tokenwatch binary not found at {}", binary.display());

    let status = Command::new(&binary)
        .args(["--api-url", "ftp://files.example.edu"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;

    assert_eq!(status.code(), Some(2));
    Ok(())
}
