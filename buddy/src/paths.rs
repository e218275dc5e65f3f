// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical on-disk layout under an install root, per the external
//! interfaces section: `.claude-buddy/` (framework data), `.claude/`
//! (integration surface), and `directive/foundation.md`.

use camino::{Utf8Path, Utf8PathBuf};

pub(crate) const BUDDY_DIR: &str = ".claude-buddy";
pub(crate) const CLAUDE_DIR: &str = ".claude";
pub(crate) const DIRECTIVE_DIR: &str = "directive";

pub(crate) const METADATA_FILE: &str = "install-metadata.json";
pub(crate) const LOCK_FILE: &str = "install.lock";

/// The three canonical directories snapshotted on every transaction
/// (`.claude-buddy`, `.claude`, `directive`).
pub(crate) const CANONICAL_DIRS: [&str; 3] = [BUDDY_DIR, CLAUDE_DIR, DIRECTIVE_DIR];

#[derive(Clone, Debug)]
pub(crate) struct InstallPaths {
    root: Utf8PathBuf,
}

impl InstallPaths {
    pub(crate) fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(crate) fn buddy_dir(&self) -> Utf8PathBuf {
        self.root.join(BUDDY_DIR)
    }

    pub(crate) fn claude_dir(&self) -> Utf8PathBuf {
        self.root.join(CLAUDE_DIR)
    }

    pub(crate) fn directive_dir(&self) -> Utf8PathBuf {
        self.root.join(DIRECTIVE_DIR)
    }

    pub(crate) fn metadata_file(&self) -> Utf8PathBuf {
        self.buddy_dir().join(METADATA_FILE)
    }

    pub(crate) fn lock_file(&self) -> Utf8PathBuf {
        self.buddy_dir().join(LOCK_FILE)
    }

    pub(crate) fn logs_dir(&self) -> Utf8PathBuf {
        self.buddy_dir().join("logs")
    }

    pub(crate) fn transaction_log(&self, transaction_id: uuid::Uuid) -> Utf8PathBuf {
        self.logs_dir().join(format!("{transaction_id}.json"))
    }

    pub(crate) fn events_log(&self) -> Utf8PathBuf {
        self.logs_dir().join("events.ndjson")
    }

    pub(crate) fn backups_dir(&self, transaction_id: uuid::Uuid) -> Utf8PathBuf {
        self.buddy_dir().join("backups").join(transaction_id.to_string())
    }

    pub(crate) fn canonical_dirs(&self) -> [Utf8PathBuf; 3] {
        [self.buddy_dir(), self.claude_dir(), self.directive_dir()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_compose_under_root() {
        let paths = InstallPaths::new("/tmp/project");
        assert_eq!(paths.metadata_file(), Utf8PathBuf::from("/tmp/project/.claude-buddy/install-metadata.json"));
        assert_eq!(paths.lock_file(), Utf8PathBuf::from("/tmp/project/.claude-buddy/install.lock"));
    }
}
