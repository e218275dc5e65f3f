// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The app-level install lock (§4.3.1). Unlike an OS `flock`, exclusion is
//! expressed in the lock file's own content — a `{pid, timestamp}` record —
//! so staleness can be judged and a dead holder's lock reclaimed.

use buddy_metadata::error::{self, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;

/// A lock older than this is considered abandoned and may be reclaimed
/// (§3.2, §4.3.1, §8.1 invariant 8).
pub(crate) const STALE_AFTER_SECS: i64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    timestamp: DateTime<Utc>,
}

/// An acquired lock; releasing it (drop or explicit `release`) removes the
/// file. Mirrors the teacher's `UnlockedRoot -> ExclusiveRoot` shape, with
/// the exclusivity test expressed over file content rather than `flock`.
#[derive(Debug)]
pub(crate) struct InstallLock {
    path: Utf8PathBuf,
    released: bool,
}

impl InstallLock {
    /// Attempts to acquire the lock at `path`. On an existing, non-stale
    /// lock returns `LOCK_EXISTS` carrying the holder's PID; on a stale one,
    /// deletes and takes over (§4.3.1 — an explicit recovery step, not a
    /// silent behavior, so the caller should log the takeover).
    pub(crate) fn acquire(path: Utf8PathBuf, now: DateTime<Utc>) -> Result<(Self, bool)> {
        let mut reclaimed = false;

        if let Some(existing) = read_lock(&path) {
            let age_secs = (now - existing.timestamp).num_seconds();
            if age_secs < STALE_AFTER_SECS {
                return Err(error::lock_exists(format!(
                    "install already in progress (pid {})",
                    existing.pid
                ))
                .with_context("holder_pid", existing.pid.to_string())
                .with_context("age_secs", age_secs.to_string()));
            }
            reclaimed = true;
        }

        write_lock(&path, now)?;
        Ok((
            Self {
                path,
                released: false,
            },
            reclaimed,
        ))
    }

    pub(crate) fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(error::action_failed(format!(
                "failed to release lock at {}: {err}",
                self.path
            ))),
        }
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

fn read_lock(path: &camino::Utf8Path) -> Option<LockRecord> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn write_lock(path: &camino::Utf8Path, now: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| error::action_failed(format!("failed to create {parent}: {err}")))?;
    }
    let record = LockRecord {
        pid: std::process::id(),
        timestamp: now,
    };
    let contents = serde_json::to_string(&record)
        .map_err(|err| error::action_failed(format!("failed to serialize lock record: {err}")))?;
    fs::write(path, contents)
        .map_err(|err| error::action_failed(format!("failed to write lock at {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_lock_blocks_a_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("install.lock")).unwrap();
        let now = Utc::now();
        let (_lock, reclaimed) = InstallLock::acquire(path.clone(), now).unwrap();
        assert!(!reclaimed);

        let err = InstallLock::acquire(path, now + Duration::seconds(1)).unwrap_err();
        assert_eq!(err.code, "LOCK_EXISTS");
    }

    #[test]
    fn stale_lock_is_reclaimed_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("install.lock")).unwrap();
        let now = Utc::now();
        let (lock, _) = InstallLock::acquire(path.clone(), now).unwrap();
        // Leak the guard so the file isn't removed by Drop before the next acquire.
        std::mem::forget(lock);

        let stale_now = now + Duration::seconds(STALE_AFTER_SECS + 1);
        let (_lock2, reclaimed) = InstallLock::acquire(path, stale_now).unwrap();
        assert!(reclaimed);
    }

    #[test]
    fn release_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("install.lock")).unwrap();
        let (lock, _) = InstallLock::acquire(path.clone(), Utc::now()).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());
    }
}
