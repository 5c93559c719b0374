// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local copy of the signed-in user, kept as an opaque JSON document.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::CurrentUser;

const USER_FILE: &str = "current-user.json";

/// `current-user.json` under the state directory.
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(dir: &Path) -> Self {
        Self { path: dir.join(USER_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nobody is signed in.
    pub fn load(&self) -> anyhow::Result<Option<CurrentUser>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write atomically (tmp file + rename). The tmp name carries the PID and
    /// a counter so concurrent saves never share a file.
    pub fn save(&self, user: &CurrentUser) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(user)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.path.with_file_name(format!("{USER_FILE}.{}.{seq}.tmp", std::process::id()));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "current user saved");
        Ok(())
    }

    /// Idempotent.
    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "current user cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "user_store_tests.rs"]
mod tests;
