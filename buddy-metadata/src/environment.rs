// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::manifest::{DependencyName, Platform};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform: Platform,
    pub architecture: String,
    pub os_version: String,
    /// Shell heuristic from `COMSPEC`/`SHELL` (§4.1).
    pub shell: Option<String>,
    pub home_dir: Utf8PathBuf,
    pub temp_dir: Utf8PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub name: DependencyName,
    pub required: bool,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Utf8PathBuf>,
    /// Fallback install paths tried for `uv`/`python` before giving up
    /// (§4.1). Empty for dependencies with no fallback search.
    #[serde(default)]
    pub tried_alternatives: Vec<Utf8PathBuf>,
}

impl DependencyInfo {
    pub fn unavailable(name: DependencyName, required: bool) -> Self {
        Self {
            name,
            required,
            available: false,
            version: None,
            location: None,
            tried_alternatives: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionReport {
    pub target_exists: bool,
    pub can_create: bool,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub is_git_repo: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceInfo {
    pub free_bytes: u64,
    pub required_bytes: u64,
    pub sufficient: bool,
}

/// The floor below which an installation is refused for lack of disk space
/// (§4.1): 50 MB.
pub const DISK_SPACE_FLOOR_BYTES: u64 = 50 * 1024 * 1024;

impl DiskSpaceInfo {
    pub fn new(free_bytes: u64) -> Self {
        Self {
            free_bytes,
            required_bytes: DISK_SPACE_FLOOR_BYTES,
            sufficient: free_bytes >= DISK_SPACE_FLOOR_BYTES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorruptionDetail {
    pub path: Utf8PathBuf,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExistingInstallInfo {
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<semver::Version>,
    #[serde(default)]
    pub corrupted: bool,
    #[serde(default)]
    pub corruption_details: Vec<CorruptionDetail>,
}

impl ExistingInstallInfo {
    pub fn absent() -> Self {
        Self {
            present: false,
            version: None,
            corrupted: false,
            corruption_details: Vec::new(),
        }
    }
}

/// Output of `probe(target_dir)` (§4.1). Pure observation — this type and the
/// function that builds it never mutate anything.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentReport {
    pub platform: PlatformInfo,
    pub dependencies: BTreeMap<DependencyName, DependencyInfo>,
    pub permissions: PermissionReport,
    pub disk_space: DiskSpaceInfo,
    pub existing_install: ExistingInstallInfo,
}

impl EnvironmentReport {
    /// `node` is required and must be `>= 18.0.0` (§4.1). Other dependencies
    /// are optional by construction.
    pub fn node_satisfies_minimum(&self, compare_lenient: impl Fn(&str, &str) -> Option<std::cmp::Ordering>) -> bool {
        let Some(node) = self.dependencies.get(&DependencyName::Node) else {
            return false;
        };
        if !node.available {
            return false;
        }
        let Some(version) = &node.version else {
            return false;
        };
        matches!(
            compare_lenient(version, "18.0.0"),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_space_reports_sufficiency_against_floor() {
        assert!(!DiskSpaceInfo::new(10).sufficient);
        assert!(DiskSpaceInfo::new(DISK_SPACE_FLOOR_BYTES).sufficient);
        assert!(DiskSpaceInfo::new(DISK_SPACE_FLOOR_BYTES + 1).sufficient);
    }

    #[test]
    fn node_minimum_version_check() {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(
            DependencyName::Node,
            DependencyInfo {
                name: DependencyName::Node,
                required: true,
                available: true,
                version: Some("18.17.0".to_string()),
                location: None,
                tried_alternatives: Vec::new(),
            },
        );
        let report = EnvironmentReport {
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
            disk_space: DiskSpaceInfo::new(DISK_SPACE_FLOOR_BYTES * 2),
            existing_install: ExistingInstallInfo::absent(),
        };
        assert!(report.node_satisfies_minimum(crate::version::compare_lenient));
    }
}
