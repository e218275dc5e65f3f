// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update orchestration (§4.5): version pre-flight, backup policy,
//! customization detection, framework-file refresh with per-file
//! configuration merge, metadata refresh, commit/rollback.

use crate::events::EventLogger;
use crate::installer;
use crate::manifest_data;
use crate::merge::{self, MergeStrategy};
use crate::paths::InstallPaths;
use crate::probe;
use crate::transaction_engine::TransactionEngine;
use buddy_metadata::error::{self, Result};
use buddy_metadata::manifest::{self, Manifest, PlatformOverrides};
use buddy_metadata::metadata::{
    HistoryStatus, InstallationMetadata, OperationKind, TransactionHistoryEntry, UserCustomization,
};
use buddy_metadata::result::{OperationResult, Warning};
use buddy_metadata::transaction::{ActionType, CheckpointPhase, PlannedAction};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::BTreeSet;

pub(crate) struct UpdateRequest<'a> {
    pub(crate) target_dir: Utf8PathBuf,
    pub(crate) assets_root: Utf8PathBuf,
    pub(crate) to_version: semver::Version,
    /// Disables framework-file preservation for customized files; config and
    /// explicitly-flagged customizations are still preserved (§4.5.4).
    pub(crate) migration_mode: bool,
    pub(crate) dry_run: bool,
    pub(crate) events: &'a EventLogger,
}

/// Transforms applied to the merged config value when crossing a specific
/// version boundary. Keyed by `"<from>-to-<to>"` (§4.5.6). Empty until a
/// release actually needs one; add entries here as they're needed, they are
/// never inferred.
fn migrations() -> Vec<(&'static str, fn(serde_json::Value) -> serde_json::Value)> {
    Vec::new()
}

const CUSTOM_NAME_PREFIXES: [&str; 2] = ["custom-", "user-"];

pub(crate) async fn update(request: UpdateRequest<'_>) -> Result<OperationResult> {
    let start = std::time::Instant::now();
    let paths = InstallPaths::new(request.target_dir.clone());

    let existing = read_metadata(&paths)?;
    let from_version = existing.version.clone();

    let mut result = OperationResult::empty(true, 0);

    if buddy_metadata::version::is_downgrade(&from_version, &request.to_version) {
        let message = format!("updating from {from_version} down to {} is a downgrade", request.to_version);
        request.events.log("update_downgrade", &message);
        result.warnings.push(Warning::new("DOWNGRADE", message));
    }

    let report = probe::probe(&request.target_dir).await;
    if !report.permissions.writable {
        return Err(error::directory_not_writable("target directory is not writable"));
    }

    let manifest = resolve_manifest()?;
    let engine = TransactionEngine::new(paths.clone(), request.events.clone());

    let backup_path = if report.permissions.is_git_repo {
        None
    } else {
        Some(create_backup(&paths).await?)
    };

    let lock = engine.acquire_lock()?;
    let mut tx = engine.create(OperationKind::Update, Some(from_version.clone()), request.to_version.clone())?;

    let customizations = detect_customizations(&paths, &existing);
    let customized_paths: BTreeSet<Utf8PathBuf> = customizations.iter().map(|c| c.file.clone()).collect();

    result.backup_path = backup_path.clone();
    result.preserved_files = customized_paths.iter().cloned().collect();

    let filtered = manifest::filter_by_dependencies(&manifest, &available_dependencies(&report));

    for enabled in &filtered.enabled {
        let component = &enabled.component;
        let source_dir = request.assets_root.join(&component.source);
        for (relative, content) in installer::enumerate_component_files(&source_dir, &component.file_patterns) {
            let target_path = component.target.join(&relative);

            if !request.migration_mode && customized_paths.contains(&target_path) {
                continue;
            }

            let absolute = request.target_dir.join(&target_path);
            let is_config = relative.extension() == Some("json");
            let action = if is_config && absolute.is_file() {
                let (action, conflicts) =
                    build_merge_action(&absolute, &target_path, &content, &component.name, &from_version, &request.to_version);
                for conflict in conflicts {
                    result.warnings.push(
                        Warning::new(
                            "CONFIG_MERGE_CONFLICT",
                            format!("'{}' differs between the existing and new configuration for {}", conflict.key, component.name),
                        )
                        .with_path(target_path.clone()),
                    );
                }
                action
            } else {
                PlannedAction::new(ActionType::Update, target_path.clone(), format!("refresh component {}", component.name))
                    .with_component(component.name.clone())
                    .with_source_content(content)
                    .with_target_permissions(manifest_data::target_permissions_for(&relative))
            };

            engine.plan_action(&mut tx, action.clone());
            engine.execute_action(&mut tx, &request.target_dir, action).await;
            result.updated_or_installed_files.push(target_path);
        }
    }

    for disabled in &filtered.disabled {
        result.warnings.push(Warning::new("COMPONENT_DISABLED", disabled.disabled_reason.clone()));
    }

    engine.checkpoint(&mut tx, CheckpointPhase::FilesCopied, &request.target_dir, &[])?;

    if request.dry_run {
        engine.release_lock(lock)?;
        result.duration_ms = start.elapsed().as_millis() as u64;
        return Ok(result);
    }

    let mut metadata = existing;
    metadata.version = request.to_version.clone();
    metadata.last_update_date = Some(Utc::now());
    metadata.user_customizations = customizations;
    // The committed transaction log will carry its own final status; the
    // entry recorded here is optimistic about the imminent commit, since
    // `commit` only transitions `tx.status` to `Completed` after this write.
    // A failed commit restores the metadata file from the pre-update
    // snapshot, discarding this entry along with the rest of the write.
    metadata.push_history(TransactionHistoryEntry {
        transaction_id: tx.transaction_id,
        operation: tx.operation,
        version: tx.to_version.clone(),
        timestamp: Utc::now(),
        status: HistoryStatus::Completed,
    });

    let metadata_relative = paths
        .metadata_file()
        .strip_prefix(&request.target_dir)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| paths.metadata_file());
    let metadata_json = metadata
        .serialize_pretty()
        .map_err(|err| error::commit_failed(format!("failed to serialize metadata: {err}")))?;
    let metadata_action = PlannedAction::new(ActionType::Update, metadata_relative, "refresh install metadata")
        .with_source_content(metadata_json.into_bytes());
    engine.plan_action(&mut tx, metadata_action.clone());
    engine.execute_action(&mut tx, &request.target_dir, metadata_action).await;

    if tx.executed_actions.iter().any(|a| !a.result.success) {
        let reason = "one or more update actions failed; see transaction log for manual recovery guidance".to_string();
        engine.rollback(tx, &request.target_dir, &reason, lock).await?;
        return Err(error::update_error(reason, from_version.to_string(), request.to_version.to_string()));
    }

    let tx = engine.commit(tx, &request.target_dir, lock).await?;
    let _ = tx;

    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

fn read_metadata(paths: &InstallPaths) -> Result<InstallationMetadata> {
    let contents = std::fs::read_to_string(paths.metadata_file())
        .map_err(|_| error::not_installed("no install-metadata.json found at the target directory"))?;
    serde_json::from_str(&contents)
        .map_err(|err| error::not_installed(format!("install-metadata.json does not parse: {err}")))
}

fn resolve_manifest() -> Result<Manifest> {
    let base = manifest_data::base_manifest();
    let errors = manifest::validate(&base);
    if !errors.is_empty() {
        return Err(manifest::validation_to_error(&errors));
    }
    Ok(manifest::build_for_platform(&base, &PlatformOverrides::default()))
}

fn available_dependencies(report: &buddy_metadata::environment::EnvironmentReport) -> BTreeSet<buddy_metadata::manifest::DependencyName> {
    report
        .dependencies
        .iter()
        .filter(|(_, info)| info.available)
        .map(|(name, _)| *name)
        .collect()
}

/// Archives the current `.claude-buddy`/`.claude`/`directive` trees under
/// `.claude/backups/backup-<ISO8601>/`, then prunes to the newest 3 (§4.5.2).
async fn create_backup(paths: &InstallPaths) -> Result<Utf8PathBuf> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let backups_root = paths.claude_dir().join("backups");
    let backup_dir = backups_root.join(format!("backup-{timestamp}"));

    for dir in paths.canonical_dirs() {
        if !dir.is_dir() {
            continue;
        }
        let relative = dir.strip_prefix(paths.root()).unwrap_or(&dir);
        let destination = backup_dir.join(relative);
        copy_dir_recursive(&dir, &destination)
            .await
            .map_err(|err| error::action_failed(format!("failed to back up {dir}: {err}")))?;
    }

    prune_old_backups(&backups_root).await;
    Ok(backup_dir)
}

async fn copy_dir_recursive(source: &Utf8Path, destination: &Utf8Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(destination).await?;
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        if path.is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(path, &target).await?;
        }
    }
    Ok(())
}

async fn prune_old_backups(backups_root: &Utf8Path) {
    const KEEP: usize = 3;
    let Ok(mut entries) = tokio::fs::read_dir(backups_root).await else {
        return;
    };
    let mut backups = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(path) = Utf8PathBuf::from_path_buf(entry.path()).ok() {
            backups.push(path);
        }
    }
    backups.sort();
    if backups.len() > KEEP {
        for stale in &backups[..backups.len() - KEEP] {
            let _ = tokio::fs::remove_dir_all(stale).await;
        }
    }
}

/// Customizations are the union of (a) explicitly declared entries carried
/// over from the previous metadata, and (b) a filename/mtime heuristic:
/// `custom-`/`user-`-prefixed files, or tracked config files whose mtime is
/// newer than the recorded install/update date (§4.5.3).
fn detect_customizations(paths: &InstallPaths, existing: &InstallationMetadata) -> Vec<UserCustomization> {
    let mut customizations: Vec<UserCustomization> = existing.user_customizations.clone();
    let known: BTreeSet<Utf8PathBuf> = customizations.iter().map(|c| c.file.clone()).collect();
    let reference_date = existing.last_update_date.unwrap_or(existing.install_date);

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
            if known.contains(relative) {
                continue;
            }

            let file_name = relative.file_name().unwrap_or_default();
            let is_custom_named = CUSTOM_NAME_PREFIXES.iter().any(|prefix| file_name.starts_with(*prefix));
            let is_tracked_config = relative.extension() == Some("json");

            let Ok(metadata) = std::fs::metadata(path) else {
                continue;
            };
            let modified = metadata
                .modified()
                .ok()
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);

            let flagged = is_custom_named || (is_tracked_config && modified > reference_date);
            if flagged {
                customizations.push(UserCustomization {
                    file: relative.to_path_buf(),
                    created_date: modified,
                    last_modified: modified,
                    description: None,
                    preserve_on_update: true,
                });
            }
        }
    }

    customizations
}

/// Builds a merge action for a JSON config file already present on disk:
/// reads the existing value, merges the incoming one over it with the
/// default strategy, and plans an `update` carrying the merged bytes
/// (§4.5.5). Also returns the conflicting top-level keys (§4.5.5 conflict
/// detection) so the caller can surface them as non-fatal warnings (§7:
/// "Config-merge conflicts are recorded but never fatal").
fn build_merge_action(
    absolute: &Utf8Path,
    target_path: &Utf8Path,
    new_content: &[u8],
    component_name: &str,
    from_version: &semver::Version,
    to_version: &semver::Version,
) -> (PlannedAction, Vec<merge::MergeConflict>) {
    let existing_value: serde_json::Value = std::fs::read_to_string(absolute)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    let new_value: serde_json::Value = serde_json::from_slice(new_content).unwrap_or(serde_json::Value::Null);

    let migration_key = format!("{from_version}-to-{to_version}");
    let transformed = migrations()
        .into_iter()
        .find(|(key, _)| *key == migration_key)
        .map(|(_, transform)| transform(new_value.clone()))
        .unwrap_or(new_value);

    let conflicts = merge::detect_conflicts(&transformed, &existing_value);
    let merged = merge::merge(MergeStrategy::ShallowMerge, &transformed, &existing_value);
    let merged_bytes = serde_json::to_vec_pretty(&merged).unwrap_or_else(|_| new_content.to_vec());

    let action = PlannedAction::new(ActionType::Update, target_path.to_path_buf(), format!("merge config for {component_name}"))
        .with_component(component_name.to_string())
        .with_source_content(merged_bytes);
    (action, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddy_metadata::metadata::InstallMode;
    use std::collections::BTreeMap;

    fn empty_metadata() -> InstallationMetadata {
        InstallationMetadata {
            version: semver::Version::new(1, 0, 0),
            install_date: Utc::now(),
            last_update_date: None,
            install_mode: InstallMode::Project,
            installed_components: BTreeMap::new(),
            user_customizations: Vec::new(),
            dependencies: BTreeMap::new(),
            transaction_history: Vec::new(),
        }
    }

    #[test]
    fn detect_customizations_flags_prefixed_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root);
        std::fs::create_dir_all(paths.claude_dir().join("hooks")).unwrap();
        std::fs::write(paths.claude_dir().join("hooks/custom-lint.py"), b"# custom").unwrap();
        std::fs::write(paths.claude_dir().join("hooks/stock.py"), b"# stock").unwrap();

        let customizations = detect_customizations(&paths, &empty_metadata());
        let flagged: Vec<&str> = customizations.iter().map(|c| c.file.as_str()).collect();
        assert!(flagged.iter().any(|f| f.ends_with("custom-lint.py")));
        assert!(!flagged.iter().any(|f| f.ends_with("stock.py")));
    }

    #[test]
    fn detect_customizations_flags_config_edited_after_install() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root);
        std::fs::create_dir_all(paths.buddy_dir().join("templates")).unwrap();
        std::fs::write(paths.buddy_dir().join("templates/settings.json"), b"{}").unwrap();

        let mut metadata = empty_metadata();
        metadata.install_date = Utc::now() - chrono::Duration::days(1);

        let customizations = detect_customizations(&paths, &metadata);
        assert!(customizations.iter().any(|c| c.file.as_str().ends_with("settings.json")));
    }

    #[test]
    fn detect_customizations_does_not_duplicate_known_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root);
        std::fs::create_dir_all(paths.claude_dir()).unwrap();
        std::fs::write(paths.claude_dir().join("custom-notes.md"), b"notes").unwrap();

        let mut metadata = empty_metadata();
        metadata.user_customizations.push(UserCustomization {
            file: Utf8PathBuf::from(".claude/custom-notes.md"),
            created_date: Utc::now(),
            last_modified: Utc::now(),
            description: None,
            preserve_on_update: true,
        });

        let customizations = detect_customizations(&paths, &metadata);
        let matches = customizations
            .iter()
            .filter(|c| c.file.as_str() == ".claude/custom-notes.md")
            .count();
        assert_eq!(matches, 1);
    }

    #[test]
    fn build_merge_action_keeps_existing_top_level_values() {
        let dir = tempfile::tempdir().unwrap();
        let absolute = Utf8PathBuf::from_path_buf(dir.path().join("settings.json")).unwrap();
        std::fs::write(&absolute, br#"{"timeout": 99, "untouched": true}"#).unwrap();

        let new_content = br#"{"timeout": 30, "newField": "x"}"#;
        let (action, conflicts) = build_merge_action(
            &absolute,
            Utf8Path::new(".claude-buddy/templates/settings.json"),
            new_content,
            "templates",
            &semver::Version::new(1, 0, 0),
            &semver::Version::new(1, 1, 0),
        );

        let merged: serde_json::Value = serde_json::from_slice(action.source_content.as_deref().unwrap()).unwrap();
        assert_eq!(merged["timeout"], serde_json::json!(99));
        assert_eq!(merged["untouched"], serde_json::json!(true));
        assert_eq!(merged["newField"], serde_json::json!("x"));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "timeout");
    }

    #[tokio::test]
    async fn prune_old_backups_keeps_only_the_newest_three() {
        let dir = tempfile::tempdir().unwrap();
        let backups_root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for name in ["backup-20240101T000000Z", "backup-20240102T000000Z", "backup-20240103T000000Z", "backup-20240104T000000Z"] {
            std::fs::create_dir(backups_root.join(name)).unwrap();
        }

        prune_old_backups(&backups_root).await;

        let mut remaining: Vec<String> = std::fs::read_dir(&backups_root)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().to_string()))
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["backup-20240102T000000Z", "backup-20240103T000000Z", "backup-20240104T000000Z"]
        );
    }

    #[tokio::test]
    async fn copy_dir_recursive_preserves_structure() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = Utf8PathBuf::from_path_buf(source_dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("top.md"), b"top").unwrap();
        std::fs::write(source.join("nested/child.md"), b"child").unwrap();

        let destination_dir = tempfile::tempdir().unwrap();
        let destination = Utf8PathBuf::from_path_buf(destination_dir.path().join("copy")).unwrap();

        copy_dir_recursive(&source, &destination).await.unwrap();

        assert_eq!(std::fs::read(destination.join("top.md")).unwrap(), b"top");
        assert_eq!(std::fs::read(destination.join("nested/child.md")).unwrap(), b"child");
    }
}
