// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The environment probe (§4.1): pure observation of platform, dependency
//! availability, permissions, disk space, and any pre-existing install. No
//! call here fails the operation by itself — it only produces a report.

use buddy_metadata::environment::{
    CorruptionDetail, DependencyInfo, DiskSpaceInfo, EnvironmentReport, ExistingInstallInfo,
    PermissionReport, PlatformInfo,
};
use buddy_metadata::manifest::{DependencyName, Platform};
use buddy_metadata::version;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Dependency probes are bounded to 5 seconds each (§4.1, §5).
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn probe(target_dir: &Utf8Path) -> EnvironmentReport {
    let platform = platform_info();

    let (node, uv, python, git) = tokio::join!(
        probe_node(),
        probe_uv(),
        probe_python(),
        probe_git(),
    );

    let mut dependencies = BTreeMap::new();
    dependencies.insert(DependencyName::Node, node);
    dependencies.insert(DependencyName::Uv, uv);
    dependencies.insert(DependencyName::Python, python);
    dependencies.insert(DependencyName::Git, git);

    let permissions = probe_permissions(target_dir).await;
    let disk_space = probe_disk_space(target_dir);
    let existing_install = probe_existing_install(target_dir);

    EnvironmentReport {
        platform,
        dependencies,
        permissions,
        disk_space,
        existing_install,
    }
}

fn platform_info() -> PlatformInfo {
    let platform = Platform::current().unwrap_or(Platform::Linux);
    let shell = match platform {
        Platform::Windows => std::env::var("COMSPEC").ok(),
        _ => std::env::var("SHELL").ok(),
    };
    let home_dir = home::home_dir()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    let temp_dir = Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));

    PlatformInfo {
        platform,
        architecture: std::env::consts::ARCH.to_string(),
        os_version: os_version_string(),
        shell,
        home_dir,
        temp_dir,
    }
}

fn os_version_string() -> String {
    sysinfo::System::os_version().unwrap_or_else(|| "unknown".to_string())
}

async fn run_version_probe(program: &Utf8Path, arg: &str) -> Option<String> {
    let result = timeout(PROBE_TIMEOUT, Command::new(program.as_str()).arg(arg).output()).await;
    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        _ => return None,
    };
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    version::extract_first_semver(&combined)
}

async fn probe_node() -> DependencyInfo {
    let program = Utf8PathBuf::from("node");
    match run_version_probe(&program, "--version").await {
        Some(version) => DependencyInfo {
            name: DependencyName::Node,
            required: true,
            available: true,
            version: Some(version),
            location: which::which("node").ok().and_then(|p| Utf8PathBuf::from_path_buf(p).ok()),
            tried_alternatives: Vec::new(),
        },
        None => DependencyInfo::unavailable(DependencyName::Node, true),
    }
}

/// Platform-specific fallback install locations tried for `uv` and `python`
/// before giving up (§4.1).
fn uv_fallback_paths() -> Vec<Utf8PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = home::home_dir().and_then(|p| Utf8PathBuf::from_path_buf(p).ok()) {
        candidates.push(home.join(".local/bin/uv"));
    }
    if cfg!(target_os = "windows") {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            candidates.push(Utf8PathBuf::from(local_app_data).join("Programs/uv/uv.exe"));
        }
    } else {
        candidates.push(Utf8PathBuf::from("/usr/local/bin/uv"));
    }
    candidates
}

fn python_candidates() -> Vec<Utf8PathBuf> {
    vec!["python3".into(), "python".into(), "py".into()]
}

async fn probe_uv() -> DependencyInfo {
    probe_with_fallbacks(DependencyName::Uv, "uv", uv_fallback_paths()).await
}

async fn probe_python() -> DependencyInfo {
    probe_with_fallbacks(DependencyName::Python, "python3", python_candidates()).await
}

async fn probe_with_fallbacks(
    name: DependencyName,
    primary: &str,
    fallbacks: Vec<Utf8PathBuf>,
) -> DependencyInfo {
    let mut tried = Vec::new();

    let primary_path = Utf8PathBuf::from(primary);
    if let Some(version) = run_version_probe(&primary_path, "--version").await {
        return DependencyInfo {
            name,
            required: false,
            available: true,
            version: Some(version),
            location: which::which(primary).ok().and_then(|p| Utf8PathBuf::from_path_buf(p).ok()),
            tried_alternatives: tried,
        };
    }
    tried.push(primary_path);

    for candidate in fallbacks {
        if let Some(version) = run_version_probe(&candidate, "--version").await {
            return DependencyInfo {
                name,
                required: false,
                available: true,
                version: Some(version),
                location: Some(candidate),
                tried_alternatives: tried,
            };
        }
        tried.push(candidate);
    }

    DependencyInfo {
        name,
        required: false,
        available: false,
        version: None,
        location: None,
        tried_alternatives: tried,
    }
}

async fn probe_git() -> DependencyInfo {
    let program = Utf8PathBuf::from("git");
    match run_version_probe(&program, "--version").await {
        Some(version) => DependencyInfo {
            name: DependencyName::Git,
            required: false,
            available: true,
            version: Some(version),
            location: which::which("git").ok().and_then(|p| Utf8PathBuf::from_path_buf(p).ok()),
            tried_alternatives: Vec::new(),
        },
        None => DependencyInfo::unavailable(DependencyName::Git, false),
    }
}

async fn probe_permissions(target_dir: &Utf8Path) -> PermissionReport {
    let target_exists = target_dir.exists();
    let can_create = if target_exists {
        true
    } else {
        tokio::fs::create_dir_all(target_dir).await.is_ok()
    };

    let probe_file = target_dir.join(".buddy-permission-probe");
    let writable = tokio::fs::write(&probe_file, b"probe").await.is_ok();
    if writable {
        let _ = tokio::fs::remove_file(&probe_file).await;
    }

    PermissionReport {
        target_exists,
        can_create,
        readable: target_dir.read_dir().is_ok(),
        writable,
        executable: writable,
        is_git_repo: target_dir.join(".git").is_dir(),
    }
}

fn probe_disk_space(target_dir: &Utf8Path) -> DiskSpaceInfo {
    use sysinfo::{DiskExt, System, SystemExt};

    let mut system = System::new();
    system.refresh_disks_list();

    let mut best_match: Option<(usize, u64)> = None;
    for disk in system.disks() {
        let Some(mount_point) = Utf8Path::from_path(disk.mount_point()) else {
            continue;
        };
        if target_dir.starts_with(mount_point) {
            let depth = mount_point.components().count();
            if best_match.map(|(d, _)| depth > d).unwrap_or(true) {
                best_match = Some((depth, disk.available_space()));
            }
        }
    }

    DiskSpaceInfo::new(best_match.map(|(_, free)| free).unwrap_or(u64::MAX))
}

fn probe_existing_install(target_dir: &Utf8Path) -> ExistingInstallInfo {
    let paths = crate::paths::InstallPaths::new(target_dir.to_path_buf());
    let metadata_path = paths.metadata_file();
    let Ok(contents) = std::fs::read_to_string(&metadata_path) else {
        return ExistingInstallInfo::absent();
    };
    let metadata: Result<buddy_metadata::metadata::InstallationMetadata, _> = serde_json::from_str(&contents);
    match metadata {
        Ok(metadata) => {
            let mut corruption_details = Vec::new();
            for component_name in metadata.installed_components.keys() {
                let path = paths.buddy_dir().join(component_name);
                if !path.exists() && !paths.claude_dir().join(component_name).exists() {
                    corruption_details.push(CorruptionDetail {
                        path,
                        description: format!("installed component '{component_name}' has no files on disk"),
                    });
                }
            }
            ExistingInstallInfo {
                present: true,
                version: Some(metadata.version),
                corrupted: !corruption_details.is_empty(),
                corruption_details,
            }
        }
        Err(_) => ExistingInstallInfo {
            present: true,
            version: None,
            corrupted: true,
            corruption_details: vec![CorruptionDetail {
                path: metadata_path,
                description: "install-metadata.json does not parse".to_string(),
            }],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_reports_absent_install() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap();
        let report = probe_existing_install(target);
        assert!(!report.present);
        assert!(!report.corrupted);
    }

    #[tokio::test]
    async fn permission_probe_reports_writable_for_fresh_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8Path::from_path(dir.path()).unwrap();
        let report = probe_permissions(target).await;
        assert!(report.writable);
        assert!(report.target_exists);
    }
}
