// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transaction engine (§4.3): locking, pre-install snapshot, planning,
//! execution, checkpoints, commit, LIFO rollback, and crash recovery. The
//! heart of the system — every operation module drives one transaction
//! through this engine from `create` to `commit`/`rollback`.

use crate::events::EventLogger;
use crate::paths::InstallPaths;
use buddy_metadata::error::{self, Result};
use buddy_metadata::transaction::{
    ActionResult, ActionStatus, ActionType, Checkpoint, CheckpointPhase, ExecutedAction,
    FileSnapshot, PlannedAction, Snapshot, Transaction, TransactionStatus,
    SNAPSHOT_CONTENT_LIMIT_BYTES,
};
use buddy_metadata::metadata::OperationKind;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;

pub(crate) struct TransactionEngine {
    paths: InstallPaths,
    events: EventLogger,
}

impl TransactionEngine {
    pub(crate) fn new(paths: InstallPaths, events: EventLogger) -> Self {
        Self { paths, events }
    }

    pub(crate) fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    /// §4.3.1: acquire the install lock, reclaiming a stale one if present.
    pub(crate) fn acquire_lock(&self) -> Result<crate::lock::InstallLock> {
        let (lock, reclaimed) = crate::lock::InstallLock::acquire(self.paths.lock_file(), Utc::now())?;
        if reclaimed {
            tracing::warn!(target: "buddy::output::standard::lock", "Reclaimed stale install lock");
        }
        Ok(lock)
    }

    pub(crate) fn release_lock(&self, lock: crate::lock::InstallLock) -> Result<()> {
        lock.release()
    }

    /// §4.3.2: new transaction id, pre-install snapshot of the canonical
    /// directories attached as both `rollback_point` and the `pre-install`
    /// checkpoint.
    pub(crate) fn create(
        &self,
        operation: OperationKind,
        from_version: Option<semver::Version>,
        to_version: semver::Version,
    ) -> Result<Transaction> {
        let now = Utc::now();
        let mut tx = Transaction::new(operation, to_version, now);
        tx.from_version = from_version;
        tx.status = TransactionStatus::InProgress;

        let snapshot = self.snapshot_canonical_dirs(now)?;
        tx.rollback_point = Some(snapshot.clone());
        tx.push_checkpoint(Checkpoint {
            phase: CheckpointPhase::PreInstall,
            snapshot,
            timestamp: now,
        });

        self.events.log("install_started", &serde_json::json!({
            "transaction_id": tx.transaction_id,
            "operation": tx.operation,
        }));

        Ok(tx)
    }

    /// An additional checkpoint at a phase boundary (§4.3.4). The snapshot
    /// attached may be incremental — only paths touched since the previous
    /// checkpoint — which callers express by passing a narrower `paths`.
    pub(crate) fn checkpoint(&self, tx: &mut Transaction, phase: CheckpointPhase, root: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<()> {
        let now = Utc::now();
        let absolute: Vec<Utf8PathBuf> = paths.iter().map(|p| root.join(p)).collect();
        let snapshot = self.snapshot_paths(&absolute, now)?;
        tx.push_checkpoint(Checkpoint {
            phase,
            snapshot,
            timestamp: now,
        });
        Ok(())
    }

    /// Appends an idempotent descriptor; never touches the filesystem
    /// (§4.3.3).
    pub(crate) fn plan_action(&self, tx: &mut Transaction, action: PlannedAction) {
        tx.plan_action(action);
    }

    /// Executes one planned action per the type table in §4.3.3, recording
    /// start time, duration, and a structured result. Never propagates the
    /// raw I/O error.
    pub(crate) async fn execute_action(&self, tx: &mut Transaction, root: &Utf8Path, action: PlannedAction) {
        let start = Utc::now();
        let result = execute_action_impl(root, tx.transaction_id, &action).await;
        let duration_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;

        let mut executed_action = action.clone();
        executed_action.status = if result.result.success {
            ActionStatus::Executed
        } else {
            ActionStatus::Failed
        };

        tx.record_execution(ExecutedAction {
            planned: executed_action,
            execution_time: start,
            duration_ms,
            previous_content: result.previous_content,
            result: result.result,
        });
    }

    /// §4.3.5: transition to `completed`, capture `post-install`, write the
    /// committed log, append the compact history entry, release the lock.
    pub(crate) async fn commit(
        &self,
        mut tx: Transaction,
        root: &Utf8Path,
        lock: crate::lock::InstallLock,
    ) -> Result<Transaction> {
        let now = Utc::now();
        tx.status = TransactionStatus::Completed;
        tx.end_time = Some(now);

        let post_install_paths = tx
            .executed_actions
            .iter()
            .map(|a| a.planned.path.clone())
            .collect::<Vec<_>>();
        self.checkpoint(&mut tx, CheckpointPhase::PostInstall, root, &post_install_paths)?;

        self.write_committed_log(&tx).await?;

        self.events.log("install_success", &serde_json::json!({
            "transaction_id": tx.transaction_id,
            "operation": tx.operation,
            "to_version": tx.to_version,
        }));

        self.release_lock(lock)?;
        Ok(tx)
    }

    /// §4.3.6: reverse executed actions in LIFO order, best-effort. Restores
    /// the metadata file from the pre-install snapshot and writes the final
    /// log with `status=rolled_back`.
    pub(crate) async fn rollback(
        &self,
        mut tx: Transaction,
        root: &Utf8Path,
        reason: &str,
        lock: crate::lock::InstallLock,
    ) -> Result<Transaction> {
        let executed: Vec<ExecutedAction> = tx.executed_actions.iter().rev().cloned().collect();

        for executed_action in executed {
            if let Err(err) = reverse_action(root, &executed_action).await {
                tracing::warn!(
                    target: "buddy::output::standard::rollback",
                    "failed to reverse action {}: {err}",
                    executed_action.planned.action_id
                );
                tx.errors.push(err);
            }
        }

        if let Some(rollback_point) = tx.rollback_point.clone() {
            if let Some(metadata) = rollback_point.metadata {
                let paths = InstallPaths::new(root.to_path_buf());
                let pretty = metadata
                    .serialize_pretty()
                    .map_err(|err| error::rollback_failed(format!("failed to serialize restored metadata: {err}")))?;
                let _ = tokio::fs::write(paths.metadata_file(), pretty).await;
            } else {
                let paths = InstallPaths::new(root.to_path_buf());
                let _ = tokio::fs::remove_file(paths.metadata_file()).await;
            }
        }

        tx.status = TransactionStatus::RolledBack;
        tx.end_time = Some(Utc::now());

        self.write_committed_log(&tx).await?;

        self.events.log("install_failed", &serde_json::json!({
            "transaction_id": tx.transaction_id,
            "operation": tx.operation,
            "reason": reason,
        }));

        self.release_lock(lock)?;
        Ok(tx)
    }

    /// §4.3.7: scan `<target>/.claude-buddy/logs/*.json` for an interrupted
    /// transaction. Detection only — the caller decides rollback, resume, or
    /// abort.
    pub(crate) fn detect_interrupted(&self) -> Result<Option<Transaction>> {
        let logs_dir = self.paths.logs_dir();
        if !logs_dir.is_dir() {
            return Ok(None);
        }

        let mut candidates: Vec<Transaction> = Vec::new();
        for entry in std::fs::read_dir(&logs_dir)
            .map_err(|err| error::checkpoint_invalid(format!("failed to read {logs_dir}: {err}")))?
        {
            let entry = entry.map_err(|err| error::checkpoint_invalid(err.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(tx) = serde_json::from_str::<Transaction>(&contents) else {
                continue;
            };
            if tx.status.is_interrupted() {
                candidates.push(tx);
            }
        }

        candidates.sort_by_key(|tx| tx.start_time);
        Ok(candidates.pop())
    }

    async fn write_committed_log(&self, tx: &Transaction) -> Result<()> {
        let log_path = self.paths.transaction_log(tx.transaction_id);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| error::commit_failed(format!("failed to create {parent}: {err}")))?;
        }
        let committed = tx.to_committed_log();
        let json = serde_json::to_string_pretty(&committed)
            .map_err(|err| error::commit_failed(format!("failed to serialize transaction log: {err}")))?;
        tokio::fs::write(&log_path, json)
            .await
            .map_err(|err| error::commit_failed(format!("failed to write {log_path}: {err}")))
    }

    fn snapshot_canonical_dirs(&self, now: chrono::DateTime<Utc>) -> Result<Snapshot> {
        let root = self.paths.root();
        let existing_metadata = std::fs::read_to_string(self.paths.metadata_file())
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok());

        let mut files = Vec::new();
        for dir in self.paths.canonical_dirs() {
            collect_snapshot(&dir, &mut files)?;
        }
        let _ = root;

        Ok(Snapshot {
            files,
            metadata: existing_metadata,
            timestamp: now,
        })
    }

    fn snapshot_paths(&self, paths: &[Utf8PathBuf], now: chrono::DateTime<Utc>) -> Result<Snapshot> {
        let mut files = Vec::new();
        for path in paths {
            if let Some(snapshot) = snapshot_one(path)? {
                files.push(snapshot);
            }
        }
        Ok(Snapshot {
            files,
            metadata: None,
            timestamp: now,
        })
    }
}

struct ExecutionOutcome {
    result: ActionResult,
    previous_content: Option<Vec<u8>>,
}

async fn execute_action_impl(root: &Utf8Path, transaction_id: uuid::Uuid, action: &PlannedAction) -> ExecutionOutcome {
    let target = root.join(&action.path);
    match action.action_type {
        ActionType::Create => create_file(&target, action).await,
        ActionType::CreateDirectory => create_directory(&target, action).await,
        ActionType::Update => update_file(&target, action).await,
        ActionType::Delete => delete_path(&target).await,
        ActionType::Skip => ExecutionOutcome {
            result: ActionResult::skipped(action.reason.clone()),
            previous_content: None,
        },
        ActionType::Backup => backup_file(root, transaction_id, &target, action).await,
    }
}

async fn create_file(target: &Utf8Path, action: &PlannedAction) -> ExecutionOutcome {
    if target.exists() {
        return ExecutionOutcome {
            result: ActionResult::skipped("target already exists"),
            previous_content: None,
        };
    }
    if let Some(parent) = target.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            return failure(format!("failed to create parent directory {parent}: {err}"));
        }
    }
    let content = action.source_content.clone().unwrap_or_default();
    if let Err(err) = tokio::fs::write(target, &content).await {
        return failure(format!("failed to write {target}: {err}"));
    }
    apply_permissions(target, action.target_permissions.as_deref()).await;
    ExecutionOutcome {
        result: ActionResult::success(),
        previous_content: None,
    }
}

async fn create_directory(target: &Utf8Path, action: &PlannedAction) -> ExecutionOutcome {
    if target.is_dir() {
        return ExecutionOutcome {
            result: ActionResult::skipped("directory already exists"),
            previous_content: None,
        };
    }
    if let Err(err) = tokio::fs::create_dir_all(target).await {
        return failure(format!("failed to create directory {target}: {err}"));
    }
    apply_permissions(target, action.target_permissions.as_deref()).await;
    ExecutionOutcome {
        result: ActionResult::success(),
        previous_content: None,
    }
}

async fn update_file(target: &Utf8Path, action: &PlannedAction) -> ExecutionOutcome {
    if !target.exists() {
        // Degrade to create (§4.3.3).
        return create_file(target, action).await;
    }
    let previous_content = tokio::fs::read(target).await.ok();
    let content = action.source_content.clone().unwrap_or_default();
    if let Err(err) = tokio::fs::write(target, &content).await {
        return failure(format!("failed to write {target}: {err}"));
    }
    apply_permissions(target, action.target_permissions.as_deref()).await;
    ExecutionOutcome {
        result: ActionResult::success(),
        previous_content,
    }
}

async fn delete_path(target: &Utf8Path) -> ExecutionOutcome {
    if !target.exists() {
        return ExecutionOutcome {
            result: ActionResult::skipped("target already absent"),
            previous_content: None,
        };
    }
    let previous_content = if target.is_file() {
        tokio::fs::read(target).await.ok()
    } else {
        None
    };
    let removal = if target.is_dir() {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    };
    if let Err(err) = removal {
        return failure(format!("failed to delete {target}: {err}"));
    }
    ExecutionOutcome {
        result: ActionResult::success(),
        previous_content,
    }
}

async fn backup_file(root: &Utf8Path, transaction_id: uuid::Uuid, target: &Utf8Path, action: &PlannedAction) -> ExecutionOutcome {
    if !target.exists() {
        return ExecutionOutcome {
            result: ActionResult::skipped("nothing to back up"),
            previous_content: None,
        };
    }
    let paths = InstallPaths::new(root.to_path_buf());
    let backup_target = paths.backups_dir(transaction_id).join(&action.path);
    if let Some(parent) = backup_target.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            return failure(format!("failed to create {parent}: {err}"));
        }
    }
    if let Err(err) = tokio::fs::copy(target, &backup_target).await {
        return failure(format!("failed to copy {target} to {backup_target}: {err}"));
    }
    ExecutionOutcome {
        result: ActionResult::success(),
        previous_content: None,
    }
}

fn failure(message: String) -> ExecutionOutcome {
    ExecutionOutcome {
        result: ActionResult::failure(message),
        previous_content: None,
    }
}

#[cfg(unix)]
async fn apply_permissions(target: &Utf8Path, permissions: Option<&str>) {
    use std::os::unix::fs::PermissionsExt;
    let Some(permissions) = permissions else {
        return;
    };
    let Ok(mode) = u32::from_str_radix(permissions, 8) else {
        return;
    };
    let _ = tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await;
}

#[cfg(not(unix))]
async fn apply_permissions(_target: &Utf8Path, _permissions: Option<&str>) {
    // POSIX-only (§4.3.3); a no-op elsewhere.
}

/// §4.3.6's reversal table.
async fn reverse_action(root: &Utf8Path, executed: &ExecutedAction) -> Result<()> {
    let target = root.join(&executed.planned.path);
    if executed.result.skipped {
        return Ok(());
    }
    match executed.planned.action_type {
        ActionType::Create => {
            let _ = tokio::fs::remove_file(&target).await;
            Ok(())
        }
        ActionType::CreateDirectory => {
            // Best-effort: only remove if now empty.
            if let Ok(mut entries) = tokio::fs::read_dir(&target).await {
                if entries.next_entry().await.ok().flatten().is_none() {
                    let _ = tokio::fs::remove_dir(&target).await;
                }
            }
            Ok(())
        }
        ActionType::Update => {
            if let Some(previous) = &executed.previous_content {
                tokio::fs::write(&target, previous)
                    .await
                    .map_err(|err| error::rollback_failed(format!("failed to restore {target}: {err}")))
            } else {
                Ok(())
            }
        }
        ActionType::Delete => {
            if let Some(previous) = &executed.previous_content {
                if let Some(parent) = target.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                tokio::fs::write(&target, previous)
                    .await
                    .map_err(|err| error::rollback_failed(format!("failed to recreate {target}: {err}")))
            } else {
                Ok(())
            }
        }
        ActionType::Skip | ActionType::Backup => Ok(()),
    }
}

fn collect_snapshot(dir: &Utf8Path, out: &mut Vec<FileSnapshot>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|err| error::checkpoint_invalid(format!("failed to walk {dir}: {err}")))?;
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        if let Some(snapshot) = snapshot_one(path)? {
            out.push(snapshot);
        }
    }
    Ok(())
}

fn snapshot_one(path: &Utf8Path) -> Result<Option<FileSnapshot>> {
    let exists = path.exists();
    if !exists {
        return Ok(None);
    }
    let metadata = std::fs::metadata(path)
        .map_err(|err| error::checkpoint_invalid(format!("failed to stat {path}: {err}")))?;
    let is_directory = metadata.is_dir();
    let size = metadata.len();
    let last_modified = metadata
        .modified()
        .ok()
        .map(chrono::DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now);

    let content = if !is_directory && size < SNAPSHOT_CONTENT_LIMIT_BYTES {
        std::fs::read_to_string(path).ok()
    } else {
        None
    };

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        Some(format!("{:o}", metadata.permissions().mode() & 0o777))
    };
    #[cfg(not(unix))]
    let permissions = None;

    Ok(Some(FileSnapshot {
        path: path.to_path_buf(),
        exists,
        is_directory,
        content,
        size,
        permissions,
        last_modified,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_action_is_idempotent_on_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap().join("file.txt");
        tokio::fs::write(&target, b"existing").await.unwrap();

        let action = PlannedAction::new(ActionType::Create, "file.txt".into(), "test")
            .with_source_content(b"new".to_vec());
        let outcome = create_file(&target, &action).await;
        assert!(outcome.result.skipped);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"existing");
    }

    #[tokio::test]
    async fn update_degrades_to_create_when_target_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap().join("file.txt");
        let action = PlannedAction::new(ActionType::Update, "file.txt".into(), "test")
            .with_source_content(b"content".to_vec());
        let outcome = update_file(&target, &action).await;
        assert!(outcome.result.success);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn delete_action_is_idempotent_on_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap().join("gone.txt");
        let outcome = delete_path(&target).await;
        assert!(outcome.result.skipped);
    }

    #[tokio::test]
    async fn update_reversal_restores_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap().join("file.txt");
        tokio::fs::write(&target, b"new content").await.unwrap();

        let planned = PlannedAction::new(ActionType::Update, "file.txt".into(), "test");
        let executed = ExecutedAction {
            planned,
            execution_time: Utc::now(),
            duration_ms: 0,
            previous_content: Some(b"old content".to_vec()),
            result: ActionResult::success(),
        };
        reverse_action(Utf8Path::from_path(dir.path()).unwrap(), &executed)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"old content");
    }
}
