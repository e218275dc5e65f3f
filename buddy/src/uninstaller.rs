// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uninstall orchestration (§4.6): validate presence, classify removals vs
//! preservations, optionally archive preserved files, execute removals,
//! prune emptied directories depth-first, summarize.

use crate::events::EventLogger;
use crate::paths::InstallPaths;
use crate::transaction_engine::TransactionEngine;
use buddy_metadata::error::{self, Result};
use buddy_metadata::metadata::{InstallationMetadata, OperationKind};
#[cfg(test)]
use buddy_metadata::metadata::{InstallMode, UserCustomization};
use buddy_metadata::result::OperationResult;
use buddy_metadata::transaction::{ActionType, PlannedAction};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;

pub(crate) struct UninstallRequest<'a> {
    pub(crate) target_dir: Utf8PathBuf,
    /// When `true`, user customizations are archived instead of deleted
    /// outright (§4.6.3).
    pub(crate) preserve_customizations: bool,
    pub(crate) dry_run: bool,
    pub(crate) events: &'a EventLogger,
}

struct RemovalPlanEntry {
    path: Utf8PathBuf,
    preserve: bool,
}

pub(crate) async fn uninstall(request: UninstallRequest<'_>) -> Result<OperationResult> {
    let start = std::time::Instant::now();
    let paths = InstallPaths::new(request.target_dir.clone());

    let metadata = read_metadata(&paths)?;

    let engine = TransactionEngine::new(paths.clone(), request.events.clone());
    let lock = engine.acquire_lock()?;
    let mut tx = engine.create(OperationKind::Uninstall, Some(metadata.version.clone()), metadata.version.clone())?;

    let plan = build_removal_plan(&paths, &metadata);

    let mut result = OperationResult::empty(true, 0);
    let mut removed_files = Vec::new();

    let preserved: Vec<&RemovalPlanEntry> = plan.iter().filter(|e| e.preserve).collect();
    let preservation_dir = if request.preserve_customizations && !preserved.is_empty() {
        Some(archive_preserved(&request.target_dir, &preserved).await?)
    } else {
        None
    };
    if let Some(dir) = &preservation_dir {
        result.preserved_files = preserved.iter().map(|e| e.path.clone()).collect();
        result.backup_path = Some(dir.clone());
    }

    for entry in &plan {
        if entry.preserve && request.preserve_customizations {
            continue;
        }
        let relative = entry.path.strip_prefix(&request.target_dir).unwrap_or(&entry.path).to_path_buf();
        let action = PlannedAction::new(ActionType::Delete, relative.clone(), "uninstall removal");
        engine.plan_action(&mut tx, action.clone());
        engine.execute_action(&mut tx, &request.target_dir, action).await;
        removed_files.push(relative);
    }

    prune_empty_directories(&paths).await;

    if request.dry_run {
        engine.release_lock(lock)?;
        result.removed_files = Some(removed_files);
        result.duration_ms = start.elapsed().as_millis() as u64;
        return Ok(result);
    }

    if tx.executed_actions.iter().any(|a| !a.result.success) {
        let reason = "one or more removal actions failed".to_string();
        engine.rollback(tx, &request.target_dir, &reason, lock).await?;
        return Err(error::action_failed(reason));
    }

    let tx = engine.commit(tx, &request.target_dir, lock).await?;
    let _ = tx;

    result.removed_files = Some(removed_files);
    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

fn read_metadata(paths: &InstallPaths) -> Result<InstallationMetadata> {
    let contents = std::fs::read_to_string(paths.metadata_file())
        .map_err(|_| error::not_installed("no install-metadata.json found at the target directory"))?;
    serde_json::from_str(&contents)
        .map_err(|err| error::not_installed(format!("install-metadata.json does not parse: {err}")))
}

/// Walks the three canonical directories, classifying every file as
/// remove or preserve based on `is_user_customization` (§4.6.2).
fn build_removal_plan(paths: &InstallPaths, metadata: &InstallationMetadata) -> Vec<RemovalPlanEntry> {
    let mut plan = Vec::new();
    for dir in paths.canonical_dirs() {
        if !dir.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir).into_iter().flatten() {
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(paths.root()) else {
                continue;
            };
            plan.push(RemovalPlanEntry {
                path: path.to_path_buf(),
                preserve: is_user_customization(relative, metadata),
            });
        }
    }
    plan
}

/// Holds when (i) the path is explicitly flagged in metadata with
/// `preserve_on_update=true`, (ii) it sits under a `personas` directory and
/// its filename matches `custom-*`/`*user-*`, or (iii) it lives under
/// `specs/` (§4.6).
fn is_user_customization(relative: &Utf8Path, metadata: &InstallationMetadata) -> bool {
    let declared = metadata
        .user_customizations
        .iter()
        .any(|customization| customization.file.as_path() == relative && customization.preserve_on_update);
    declared || is_persona_customization(relative) || is_under_specs(relative)
}

fn is_persona_customization(relative: &Utf8Path) -> bool {
    if !relative.components().any(|component| component.as_str() == "personas") {
        return false;
    }
    let Some(file_name) = relative.file_name() else {
        return false;
    };
    file_name.starts_with("custom-") || file_name.contains("user-")
}

fn is_under_specs(relative: &Utf8Path) -> bool {
    relative.components().next().map(|component| component.as_str() == "specs").unwrap_or(false)
}

/// Archives preserved files under
/// `<target>/.claude-buddy-preserved-<ISO8601>/` with a manifest text file
/// (§4.6.3).
async fn archive_preserved(target_dir: &Utf8Path, preserved: &[&RemovalPlanEntry]) -> Result<Utf8PathBuf> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let archive_dir = target_dir.join(format!(".claude-buddy-preserved-{timestamp}"));
    tokio::fs::create_dir_all(&archive_dir)
        .await
        .map_err(|err| error::action_failed(format!("failed to create {archive_dir}: {err}")))?;

    let mut manifest_lines = vec![
        "Files preserved from a buddy uninstall.".to_string(),
        format!("Archived at: {timestamp}"),
        String::new(),
    ];

    for entry in preserved {
        let relative = entry.path.strip_prefix(target_dir).unwrap_or(&entry.path);
        let destination = archive_dir.join(relative);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| error::action_failed(format!("failed to create {parent}: {err}")))?;
        }
        tokio::fs::copy(&entry.path, &destination)
            .await
            .map_err(|err| error::action_failed(format!("failed to archive {}: {err}", entry.path)))?;
        manifest_lines.push(relative.to_string());
    }

    let manifest_path = archive_dir.join("PRESERVATION_INFO.txt");
    tokio::fs::write(&manifest_path, manifest_lines.join("\n"))
        .await
        .map_err(|err| error::action_failed(format!("failed to write {manifest_path}: {err}")))?;

    Ok(archive_dir)
}

/// Removes now-empty directories under the canonical roots, deepest first
/// (§4.6.4), never removing the canonical roots themselves.
async fn prune_empty_directories(paths: &InstallPaths) {
    for dir in paths.canonical_dirs() {
        if !dir.is_dir() {
            continue;
        }
        let mut subdirs: Vec<Utf8PathBuf> = walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| Utf8PathBuf::from_path_buf(e.into_path()).ok())
            .collect();
        // Deepest first, so a parent only gets its turn once every child
        // beneath it has already been considered.
        subdirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for subdir in subdirs {
            if let Ok(mut entries) = tokio::fs::read_dir(&subdir).await {
                if entries.next_entry().await.ok().flatten().is_none() {
                    let _ = tokio::fs::remove_dir(&subdir).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metadata_with_customizations(files: &[&str]) -> InstallationMetadata {
        InstallationMetadata {
            version: semver::Version::new(1, 0, 0),
            install_date: Utc::now(),
            last_update_date: None,
            install_mode: InstallMode::Project,
            installed_components: BTreeMap::new(),
            user_customizations: files
                .iter()
                .map(|file| UserCustomization {
                    file: Utf8PathBuf::from(*file),
                    created_date: Utc::now(),
                    last_modified: Utc::now(),
                    description: None,
                    preserve_on_update: true,
                })
                .collect(),
            dependencies: BTreeMap::new(),
            transaction_history: Vec::new(),
        }
    }

    #[test]
    fn is_user_customization_matches_flagged_files_only() {
        let metadata = metadata_with_customizations(&[".claude/custom-notes.md"]);
        assert!(is_user_customization(Utf8Path::new(".claude/custom-notes.md"), &metadata));
        assert!(!is_user_customization(Utf8Path::new(".claude/commands/deploy.md"), &metadata));
    }

    #[test]
    fn is_user_customization_matches_persona_naming_without_metadata() {
        let metadata = metadata_with_customizations(&[]);
        assert!(is_user_customization(
            Utf8Path::new(".claude-buddy/personas/custom-reviewer.md"),
            &metadata
        ));
        assert!(is_user_customization(
            Utf8Path::new(".claude-buddy/personas/my-user-persona.md"),
            &metadata
        ));
        assert!(!is_user_customization(
            Utf8Path::new(".claude-buddy/personas/reviewer.md"),
            &metadata
        ));
    }

    #[test]
    fn is_user_customization_matches_specs_directory_without_metadata() {
        let metadata = metadata_with_customizations(&[]);
        assert!(is_user_customization(Utf8Path::new("specs/design.md"), &metadata));
        assert!(!is_user_customization(Utf8Path::new("directive/foundation.md"), &metadata));
    }

    #[test]
    fn build_removal_plan_preserves_only_flagged_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root);
        std::fs::create_dir_all(paths.claude_dir()).unwrap();
        std::fs::write(paths.claude_dir().join("custom-notes.md"), b"notes").unwrap();
        std::fs::write(paths.claude_dir().join("stock.md"), b"stock").unwrap();

        let metadata = metadata_with_customizations(&[".claude/custom-notes.md"]);
        let plan = build_removal_plan(&paths, &metadata);

        let preserved: Vec<&str> = plan.iter().filter(|e| e.preserve).map(|e| e.path.as_str()).collect();
        assert_eq!(preserved.len(), 1);
        assert!(preserved[0].ends_with("custom-notes.md"));
        assert!(plan.iter().any(|e| !e.preserve && e.path.as_str().ends_with("stock.md")));
    }

    #[tokio::test]
    async fn archive_preserved_writes_files_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let target_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let file_path = target_dir.join(".claude/custom-notes.md");
        std::fs::create_dir_all(file_path.parent().unwrap()).unwrap();
        std::fs::write(&file_path, b"notes").unwrap();

        let entry = RemovalPlanEntry {
            path: file_path.clone(),
            preserve: true,
        };
        let archive_dir = archive_preserved(&target_dir, &[&entry]).await.unwrap();

        assert_eq!(std::fs::read(archive_dir.join(".claude/custom-notes.md")).unwrap(), b"notes");
        assert!(archive_dir.join("PRESERVATION_INFO.txt").is_file());
    }

    #[tokio::test]
    async fn prune_empty_directories_removes_emptied_subdirs_but_not_canonical_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root);
        std::fs::create_dir_all(paths.claude_dir().join("hooks")).unwrap();

        prune_empty_directories(&paths).await;

        assert!(paths.claude_dir().is_dir());
        assert!(!paths.claude_dir().join("hooks").is_dir());
    }
}
