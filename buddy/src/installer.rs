// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fresh-install orchestration (§4.4): probe & validate, lock & create
//! transaction, plan directories, plan components, execute, plan
//! configuration, verify, commit. Mirrors the shape of the teacher's
//! `InstallRoot::install_impl` — an RAII guard around a single transaction
//! that rolls back on any early return or panic.

use crate::events::EventLogger;
use crate::manifest_data;
use crate::paths::InstallPaths;
use crate::probe;
use crate::transaction_engine::TransactionEngine;
use buddy_metadata::environment::EnvironmentReport;
use buddy_metadata::error::{self, Result};
use buddy_metadata::manifest::{self, DependencyName, FilteredManifest, Manifest, PlatformOverrides};
use buddy_metadata::metadata::{
    DependencyRecord, InstallMode, InstallationMetadata, InstalledComponent, OperationKind,
};
use buddy_metadata::result::{OperationResult, Warning};
use buddy_metadata::transaction::{ActionType, CheckpointPhase, PlannedAction, Transaction};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;

pub(crate) struct InstallRequest<'a> {
    pub(crate) target_dir: Utf8PathBuf,
    pub(crate) assets_root: Utf8PathBuf,
    pub(crate) install_mode: InstallMode,
    pub(crate) dry_run: bool,
    pub(crate) events: &'a EventLogger,
}

#[derive(Clone, Debug)]
struct VerificationIssue {
    path: Utf8PathBuf,
    description: String,
    severity: Severity,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Severity {
    Error,
    Warning,
}

pub(crate) async fn install(request: InstallRequest<'_>) -> Result<OperationResult> {
    let start = Instant::now();
    let paths = InstallPaths::new(request.target_dir.clone());

    // 1. Probe & validate.
    let report = probe::probe(&request.target_dir).await;
    validate_env(&report)?;

    let manifest = resolve_manifest()?;
    let filtered = manifest::filter_by_dependencies(&manifest, &available_dependencies(&report));

    let engine = TransactionEngine::new(paths.clone(), request.events.clone());

    // 2. Lock & create transaction.
    let lock = engine.acquire_lock()?;
    let mut tx = engine.create(OperationKind::Install, None, manifest.schema_version.clone())?;

    let outcome = run_install_plan(&engine, &mut tx, &request, &manifest, &filtered, &report).await;

    match outcome {
        Ok((mut result, metadata)) => {
            if request.dry_run {
                engine.release_lock(lock)?;
                result.duration_ms = start.elapsed().as_millis() as u64;
                return Ok(result);
            }

            let metadata_relative = paths
                .metadata_file()
                .strip_prefix(&request.target_dir)
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|_| paths.metadata_file());
            let metadata_json = metadata
                .serialize_pretty()
                .map_err(|err| error::commit_failed(format!("failed to serialize metadata: {err}")))?;
            let metadata_action = PlannedAction::new(ActionType::Create, metadata_relative, "write install metadata")
                .with_source_content(metadata_json.into_bytes());
            engine.plan_action(&mut tx, metadata_action.clone());
            engine.execute_action(&mut tx, &request.target_dir, metadata_action).await;

            let verification = verify(&paths, &manifest, &result.updated_or_installed_files);
            if verification.iter().any(|issue| issue.severity == Severity::Error) {
                let reason = verification
                    .iter()
                    .map(|issue| issue.description.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                engine.rollback(tx, &request.target_dir, &reason, lock).await?;
                return Err(error::action_failed(format!(
                    "post-install verification failed: {reason}"
                )));
            }

            let tx = engine.commit(tx, &request.target_dir, lock).await?;
            let _ = tx;

            result.warnings.extend(verification.into_iter().map(|issue| {
                Warning::new("VERIFICATION_ISSUE", issue.description).with_path(issue.path)
            }));
            result.duration_ms = start.elapsed().as_millis() as u64;
            Ok(result)
        }
        Err(err) => {
            engine.rollback(tx, &request.target_dir, &err.message, lock).await?;
            Err(err)
        }
    }
}

fn validate_env(report: &EnvironmentReport) -> Result<()> {
    if !report.disk_space.sufficient {
        return Err(error::disk_space_low(format!(
            "only {} bytes free, need {}",
            report.disk_space.free_bytes, report.disk_space.required_bytes
        )));
    }
    if !report.permissions.writable {
        return Err(error::directory_not_writable("target directory is not writable"));
    }
    if !report.node_satisfies_minimum(buddy_metadata::version::compare_lenient) {
        return Err(error::dependency_missing("node >= 18.0.0 is required"));
    }
    Ok(())
}

fn resolve_manifest() -> Result<Manifest> {
    let base = manifest_data::base_manifest();
    let errors = manifest::validate(&base);
    if !errors.is_empty() {
        return Err(manifest::validation_to_error(&errors));
    }
    let overrides = PlatformOverrides::default();
    Ok(manifest::build_for_platform(&base, &overrides))
}

fn available_dependencies(report: &EnvironmentReport) -> std::collections::BTreeSet<DependencyName> {
    report
        .dependencies
        .iter()
        .filter(|(_, info)| info.available)
        .map(|(name, _)| *name)
        .collect()
}

async fn run_install_plan(
    engine: &TransactionEngine,
    tx: &mut Transaction,
    request: &InstallRequest<'_>,
    manifest: &Manifest,
    filtered: &FilteredManifest,
    report: &EnvironmentReport,
) -> Result<(OperationResult, InstallationMetadata)> {
    let mut result = OperationResult::empty(true, 0);
    let mut warnings = Vec::new();

    // 3. Plan directories.
    for directory in &manifest.directories {
        let action = PlannedAction::new(ActionType::CreateDirectory, directory.path.clone(), "manifest-declared directory")
            .with_target_permissions(directory.permissions.clone());
        engine.plan_action(tx, action);
    }

    engine.checkpoint(tx, CheckpointPhase::DependenciesChecked, &request.target_dir, &[])?;

    // Execute directory-creation actions before components, so component
    // files always land under an existing parent.
    let planned_dirs: Vec<PlannedAction> = tx
        .planned_actions
        .iter()
        .filter(|a| a.action_type == ActionType::CreateDirectory)
        .cloned()
        .collect();
    for action in planned_dirs {
        engine.execute_action(tx, &request.target_dir, action).await;
    }
    engine.checkpoint(tx, CheckpointPhase::DirectoriesCreated, &request.target_dir, &[])?;

    // 4. Plan & execute components.
    let mut installed_components = BTreeMap::new();
    for enabled in &filtered.enabled {
        let component = &enabled.component;
        if !enabled.dependency_issues.is_empty() {
            let names: Vec<&str> = enabled.dependency_issues.iter().map(|d| d.as_str()).collect();
            return Err(error::dependency_missing(format!(
                "required component '{}' is missing dependencies: {}",
                component.name,
                names.join(", ")
            )));
        }

        let source_dir = request.assets_root.join(&component.source);
        let files = enumerate_component_files(&source_dir, &component.file_patterns);
        let mut component_failure = None;
        for (relative, content) in files {
            let target_path = component.target.join(&relative);
            let permissions = manifest_data::target_permissions_for(&relative);
            let action = PlannedAction::new(ActionType::Create, target_path.clone(), format!("component {}", component.name))
                .with_component(component.name.clone())
                .with_source_content(content)
                .with_target_permissions(permissions);
            engine.plan_action(tx, action.clone());
            engine.execute_action(tx, &request.target_dir, action).await;

            let succeeded = tx
                .executed_actions
                .last()
                .map(|executed| executed.result.success)
                .unwrap_or(false);
            if succeeded {
                result.updated_or_installed_files.push(target_path);
            } else {
                let message = tx
                    .executed_actions
                    .last()
                    .and_then(|executed| executed.result.message.clone())
                    .unwrap_or_else(|| format!("failed to install {target_path}"));
                component_failure.get_or_insert(message);
            }
        }

        if let Some(message) = component_failure {
            match component.component_type {
                manifest::ComponentType::Required => {
                    return Err(error::action_failed(format!(
                        "required component '{}' failed to install: {message}",
                        component.name
                    )));
                }
                manifest::ComponentType::Optional => {
                    warnings.push(Warning::new("COMPONENT_ACTION_FAILED", format!(
                        "optional component '{}' failed to install: {message}",
                        component.name
                    )));
                }
            }
        }

        installed_components.insert(
            component.name.clone(),
            InstalledComponent {
                version: manifest.schema_version.clone(),
                enabled: true,
                reason: None,
                last_modified: None,
            },
        );
    }

    for disabled in &filtered.disabled {
        warnings.push(Warning::new("COMPONENT_DISABLED", disabled.disabled_reason.clone()));
        installed_components.insert(
            disabled.component.name.clone(),
            InstalledComponent {
                version: manifest.schema_version.clone(),
                enabled: false,
                reason: Some(disabled.disabled_reason.clone()),
                last_modified: None,
            },
        );
    }

    engine.checkpoint(tx, CheckpointPhase::FilesCopied, &request.target_dir, &[])?;

    // 6. Build configuration for the commit stage above (the metadata write
    // itself happens one level up, once this function has returned).
    let dependencies: BTreeMap<String, DependencyRecord> = report
        .dependencies
        .iter()
        .map(|(name, info)| {
            (
                name.to_string(),
                DependencyRecord {
                    version: info.version.clone(),
                    required: info.required,
                    available: info.available,
                    location: info.location.clone(),
                },
            )
        })
        .collect();

    let metadata = InstallationMetadata {
        version: manifest.schema_version.clone(),
        install_date: Utc::now(),
        last_update_date: None,
        install_mode: request.install_mode,
        installed_components,
        user_customizations: Vec::new(),
        dependencies,
        transaction_history: Vec::new(),
    };

    result.warnings = warnings;
    Ok((result, metadata))
}

pub(crate) fn enumerate_component_files(source_dir: &Utf8Path, patterns: &[String]) -> Vec<(Utf8PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    if !source_dir.is_dir() {
        return files;
    }
    for entry in walkdir::WalkDir::new(source_dir).into_iter().flatten() {
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(source_dir) else {
            continue;
        };
        let file_name = relative.file_name().unwrap_or_default();
        let matches = patterns
            .iter()
            .any(|pattern| glob::Pattern::new(pattern).map(|p| p.matches(file_name)).unwrap_or(false));
        if matches {
            if let Ok(content) = std::fs::read(path) {
                files.push((relative.to_path_buf(), content));
            }
        }
    }
    files
}

fn verify(paths: &InstallPaths, manifest: &Manifest, installed_files: &[Utf8PathBuf]) -> Vec<VerificationIssue> {
    let mut issues = Vec::new();

    for directory in &manifest.directories {
        let full = paths.root().join(&directory.path);
        if directory.create_if_missing && !full.is_dir() {
            issues.push(VerificationIssue {
                path: full,
                description: format!("expected directory '{}' to exist", directory.path),
                severity: Severity::Error,
            });
        }
    }

    if std::fs::read_to_string(paths.metadata_file())
        .ok()
        .and_then(|contents| serde_json::from_str::<serde_json::Value>(&contents).ok())
        .is_none()
    {
        issues.push(VerificationIssue {
            path: paths.metadata_file(),
            description: "install-metadata.json does not parse".to_string(),
            severity: Severity::Error,
        });
    }

    for relative in installed_files {
        let full = paths.root().join(relative);
        let readable = std::fs::File::open(&full).is_ok();
        if !full.is_file() || !readable {
            issues.push(VerificationIssue {
                path: full,
                description: format!("expected planned file '{relative}' to be present and readable"),
                severity: Severity::Error,
            });
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddy_metadata::environment::{
        DependencyInfo, DiskSpaceInfo, ExistingInstallInfo, PermissionReport, PlatformInfo,
    };
    use buddy_metadata::manifest::Platform;
    use std::collections::BTreeMap;

    fn healthy_report() -> EnvironmentReport {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(
            DependencyName::Node,
            DependencyInfo {
                name: DependencyName::Node,
                required: true,
                available: true,
                version: Some("20.11.0".to_string()),
                location: None,
                tried_alternatives: Vec::new(),
            },
        );
        EnvironmentReport {
            platform: PlatformInfo {
                platform: Platform::Linux,
                architecture: "x86_64".to_string(),
                os_version: "test".to_string(),
                shell: None,
                home_dir: "/home/test".into(),
                temp_dir: "/tmp".into(),
            },
            dependencies,
            permissions: PermissionReport {
                target_exists: true,
                can_create: true,
                readable: true,
                writable: true,
                executable: true,
                is_git_repo: false,
            },
            disk_space: DiskSpaceInfo::new(buddy_metadata::environment::DISK_SPACE_FLOOR_BYTES * 2),
            existing_install: ExistingInstallInfo::absent(),
        }
    }

    #[test]
    fn validate_env_accepts_a_healthy_report() {
        assert!(validate_env(&healthy_report()).is_ok());
    }

    #[test]
    fn validate_env_rejects_low_disk_space() {
        let mut report = healthy_report();
        report.disk_space = DiskSpaceInfo::new(10);
        let err = validate_env(&report).unwrap_err();
        assert_eq!(err.code, "DISK_SPACE_LOW");
    }

    #[test]
    fn validate_env_rejects_unwritable_target() {
        let mut report = healthy_report();
        report.permissions.writable = false;
        let err = validate_env(&report).unwrap_err();
        assert_eq!(err.code, "DIRECTORY_NOT_WRITABLE");
    }

    #[test]
    fn validate_env_rejects_missing_node() {
        let mut report = healthy_report();
        report.dependencies.insert(DependencyName::Node, DependencyInfo::unavailable(DependencyName::Node, true));
        let err = validate_env(&report).unwrap_err();
        assert_eq!(err.code, "DEPENDENCY_MISSING");
    }

    #[test]
    fn resolve_manifest_round_trips_through_validation() {
        let manifest = resolve_manifest().unwrap();
        assert!(!manifest.components.is_empty());
        assert!(manifest::validate(&manifest).is_empty());
    }

    #[test]
    fn enumerate_component_files_filters_by_glob_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("a.md"), b"a").unwrap();
        std::fs::write(root.join("b.txt"), b"b").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/c.md"), b"c").unwrap();

        let mut files = enumerate_component_files(root, &["*.md".to_string()]);
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files
            .iter()
            .any(|(path, content)| path.as_str() == "a.md" && content == b"a"));
        assert!(files.iter().any(|(path, _)| path.as_str() == "sub/c.md"));
    }

    #[test]
    fn enumerate_component_files_returns_empty_for_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().join("does-not-exist");
        assert!(enumerate_component_files(&root, &["*.md".to_string()]).is_empty());
    }

    #[test]
    fn verify_flags_a_missing_declared_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallPaths::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let manifest = resolve_manifest().unwrap();
        let issues = verify(&paths, &manifest, &[]);
        assert!(issues.iter().any(|issue| issue.severity == Severity::Error));
    }

    #[test]
    fn verify_passes_once_directories_and_metadata_exist() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallPaths::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let manifest = resolve_manifest().unwrap();
        for directory in &manifest.directories {
            std::fs::create_dir_all(paths.root().join(&directory.path)).unwrap();
        }
        std::fs::write(paths.metadata_file(), "{}").unwrap();
        let issues = verify(&paths, &manifest, &[]);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn verify_flags_a_missing_planned_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallPaths::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let manifest = resolve_manifest().unwrap();
        for directory in &manifest.directories {
            std::fs::create_dir_all(paths.root().join(&directory.path)).unwrap();
        }
        std::fs::write(paths.metadata_file(), "{}").unwrap();
        let issues = verify(&paths, &manifest, &[Utf8PathBuf::from("directive/foundation.md")]);
        assert!(issues
            .iter()
            .any(|issue| issue.severity == Severity::Error && issue.description.contains("foundation.md")));
    }
}
