// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::metadata::{HistoryStatus, InstallationMetadata, OperationKind, TransactionHistoryEntry};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    /// Maps a finished transaction status onto the narrower enum recorded in
    /// `metadata.transaction_history` (§3.1, §6.2). `None` for the two
    /// in-flight statuses, which never reach history.
    pub fn to_history_status(self) -> Option<HistoryStatus> {
        match self {
            TransactionStatus::Completed => Some(HistoryStatus::Completed),
            TransactionStatus::Failed => Some(HistoryStatus::Failed),
            TransactionStatus::RolledBack => Some(HistoryStatus::RolledBack),
            TransactionStatus::Pending | TransactionStatus::InProgress => None,
        }
    }

    /// Whether `detect_interrupted` (§4.3.7) should surface a log carrying
    /// this status.
    pub fn is_interrupted(self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::InProgress)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointPhase {
    PreInstall,
    DependenciesChecked,
    DirectoriesCreated,
    FilesCopied,
    PostInstall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: Utf8PathBuf,
    pub exists: bool,
    pub is_directory: bool,
    /// Only populated for text files under 100 KB (§3.1). Larger or binary
    /// files are referenced by path + mtime only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub size: u64,
    /// Octal permission string on POSIX; `None` on platforms without the
    /// concept (e.g. Windows ACLs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// The maximum size, in bytes, at which a text file's content is captured
/// inline in a snapshot (§3.1, §4.3.2).
pub const SNAPSHOT_CONTENT_LIMIT_BYTES: u64 = 100 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: Vec<FileSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InstallationMetadata>,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            files: Vec::new(),
            metadata: None,
            timestamp,
        }
    }
}

/// A checkpoint-level summary used in the committed transaction log, where
/// snapshots are reduced to file counts rather than persisted twice in full
/// (spec Design Notes §9, "transaction log size").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub file_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            file_count: snapshot.files.len(),
            timestamp: snapshot.timestamp,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: CheckpointPhase,
    pub snapshot: Snapshot,
    pub timestamp: DateTime<Utc>,
}

/// A checkpoint as recorded in the committed log: snapshot content is
/// summarised, not duplicated in full.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub phase: CheckpointPhase,
    pub snapshot: SnapshotSummary,
    pub timestamp: DateTime<Utc>,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            phase: checkpoint.phase,
            snapshot: SnapshotSummary::from(&checkpoint.snapshot),
            timestamp: checkpoint.timestamp,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    CreateDirectory,
    Update,
    Delete,
    Skip,
    Backup,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Planned,
    Executed,
    Failed,
}

/// An idempotent descriptor appended by `plan_action` (§4.3.3). Plans never
/// touch the filesystem themselves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_id: uuid::Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub path: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub reason: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_permissions: Option<String>,
}

impl PlannedAction {
    pub fn new(action_type: ActionType, path: Utf8PathBuf, reason: impl Into<String>) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4(),
            action_type,
            path,
            component: None,
            reason: reason.into(),
            status: ActionStatus::Planned,
            source_content: None,
            target_permissions: None,
        }
    }

    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[must_use]
    pub fn with_source_content(mut self, content: Vec<u8>) -> Self {
        self.source_content = Some(content);
        self
    }

    #[must_use]
    pub fn with_target_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.target_permissions = Some(permissions.into());
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            warning: None,
            skipped: false,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            warning: None,
            skipped: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            warning: None,
            skipped: false,
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// `PlannedAction ∪ {execution_time, duration_ms, previous_content?, result}`
/// per §3.1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutedAction {
    #[serde(flatten)]
    pub planned: PlannedAction,
    pub execution_time: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<Vec<u8>>,
    pub result: ActionResult,
}

/// A transaction log entry as persisted at
/// `<install-root>/.claude-buddy/logs/<uuid>.json` and held in-flight in
/// memory (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: uuid::Uuid,
    pub operation: OperationKind,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<semver::Version>,
    pub to_version: semver::Version,
    pub checkpoints: Vec<Checkpoint>,
    pub planned_actions: Vec<PlannedAction>,
    pub executed_actions: Vec<ExecutedAction>,
    #[serde(default)]
    pub errors: Vec<crate::error::Error>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_point: Option<Snapshot>,
}

impl Transaction {
    pub fn new(operation: OperationKind, to_version: semver::Version, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: uuid::Uuid::new_v4(),
            operation,
            status: TransactionStatus::Pending,
            start_time: now,
            end_time: None,
            from_version: None,
            to_version,
            checkpoints: Vec::new(),
            planned_actions: Vec::new(),
            executed_actions: Vec::new(),
            errors: Vec::new(),
            rollback_point: None,
        }
    }

    pub fn plan_action(&mut self, action: PlannedAction) {
        self.planned_actions.push(action);
    }

    pub fn record_execution(&mut self, executed: ExecutedAction) {
        self.executed_actions.push(executed);
    }

    pub fn push_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.push(checkpoint);
    }

    /// Executed actions in LIFO order, the order `rollback` must reverse them
    /// in (§4.3.6, §8.1 invariant 2).
    pub fn executed_actions_lifo(&self) -> impl Iterator<Item = &ExecutedAction> {
        self.executed_actions.iter().rev()
    }

    pub fn history_entry(&self) -> Option<TransactionHistoryEntry> {
        Some(TransactionHistoryEntry {
            transaction_id: self.transaction_id,
            operation: self.operation,
            version: self.to_version.clone(),
            timestamp: self.end_time.unwrap_or(self.start_time),
            status: self.status.to_history_status()?,
        })
    }

    /// Produces the log form written on commit/rollback: full action lists,
    /// but checkpoint snapshots summarised to file counts (Design Notes §9).
    pub fn to_committed_log(&self) -> CommittedTransactionLog {
        CommittedTransactionLog {
            transaction_id: self.transaction_id,
            operation: self.operation,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            from_version: self.from_version.clone(),
            to_version: self.to_version.clone(),
            checkpoints: self.checkpoints.iter().map(CheckpointSummary::from).collect(),
            planned_actions: self.planned_actions.clone(),
            executed_actions: self.executed_actions.clone(),
            errors: self.errors.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommittedTransactionLog {
    pub transaction_id: uuid::Uuid,
    pub operation: OperationKind,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<semver::Version>,
    pub to_version: semver::Version,
    pub checkpoints: Vec<CheckpointSummary>,
    pub planned_actions: Vec<PlannedAction>,
    pub executed_actions: Vec<ExecutedAction>,
    #[serde(default)]
    pub errors: Vec<crate::error::Error>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executed_actions_lifo_reverses_order() {
        let mut tx = Transaction::new(OperationKind::Install, semver::Version::new(1, 0, 0), Utc::now());
        for i in 0..3 {
            let planned = PlannedAction::new(ActionType::Create, format!("f{i}").into(), "test");
            tx.record_execution(ExecutedAction {
                planned,
                execution_time: Utc::now(),
                duration_ms: 0,
                previous_content: None,
                result: ActionResult::success(),
            });
        }
        let order: Vec<&str> = tx.executed_actions_lifo().map(|a| a.planned.path.as_str()).collect();
        assert_eq!(order, vec!["f2", "f1", "f0"]);
    }

    #[test]
    fn history_entry_absent_for_in_flight_status() {
        let tx = Transaction::new(OperationKind::Install, semver::Version::new(1, 0, 0), Utc::now());
        assert!(tx.history_entry().is_none());
    }

    #[test]
    fn history_entry_present_once_completed() {
        let mut tx = Transaction::new(OperationKind::Install, semver::Version::new(1, 0, 0), Utc::now());
        tx.status = TransactionStatus::Completed;
        tx.end_time = Some(Utc::now());
        let entry = tx.history_entry().unwrap();
        assert_eq!(entry.status, HistoryStatus::Completed);
    }

    #[test]
    fn committed_log_summarises_checkpoint_snapshots() {
        let mut tx = Transaction::new(OperationKind::Install, semver::Version::new(1, 0, 0), Utc::now());
        let mut snapshot = Snapshot::empty(Utc::now());
        snapshot.files.push(FileSnapshot {
            path: "a".into(),
            exists: true,
            is_directory: false,
            content: Some("hi".to_string()),
            size: 2,
            permissions: Some("644".to_string()),
            last_modified: Utc::now(),
        });
        tx.push_checkpoint(Checkpoint {
            phase: CheckpointPhase::PreInstall,
            snapshot,
            timestamp: Utc::now(),
        });
        let log = tx.to_committed_log();
        assert_eq!(log.checkpoints[0].snapshot.file_count, 1);
    }
}
