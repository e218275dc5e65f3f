// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    Project,
    Global,
    Dev,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Update,
    Uninstall,
    Repair,
}

/// The subset of `TransactionStatus` (see `transaction.rs`) that is valid for
/// a finished, recorded history entry — `pending`/`in_progress` never reach
/// `transaction_history`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Completed,
    Failed,
    RolledBack,
}

/// One entry in `installed_components` (§6.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstalledComponent {
    pub version: semver::Version,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// §3.1: a user-created or user-modified file flagged for preservation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserCustomization {
    pub file: Utf8PathBuf,
    pub created_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub preserve_on_update: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub required: bool,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Utf8PathBuf>,
}

/// A compact, append-only entry in `transaction_history` (§3.1 invariant ii:
/// ordered ascending by timestamp).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionHistoryEntry {
    pub transaction_id: uuid::Uuid,
    pub operation: OperationKind,
    pub version: semver::Version,
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
}

/// Persisted at `<install-root>/.claude-buddy/install-metadata.json` (§3.1,
/// §6.2). Read at operation start, mutated in-memory, written once on a
/// successful commit; restored verbatim from the rollback-point snapshot on
/// rollback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallationMetadata {
    pub version: semver::Version,
    pub install_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_date: Option<DateTime<Utc>>,
    pub install_mode: InstallMode,
    pub installed_components: BTreeMap<String, InstalledComponent>,
    #[serde(default)]
    pub user_customizations: Vec<UserCustomization>,
    pub dependencies: BTreeMap<String, DependencyRecord>,
    #[serde(default)]
    pub transaction_history: Vec<TransactionHistoryEntry>,
}

impl InstallationMetadata {
    /// §3.1 invariant i: after a successful commit the metadata version
    /// matches the manifest/target version driving that commit.
    pub fn matches_target_version(&self, target: &semver::Version) -> bool {
        &self.version == target
    }

    /// §3.1 invariant iii: every installed-component key must exist in the
    /// manifest that produced the entry.
    pub fn installed_components_known_to(&self, manifest_component_names: &[&str]) -> bool {
        self.installed_components
            .keys()
            .all(|name| manifest_component_names.contains(&name.as_str()))
    }

    pub fn push_history(&mut self, entry: TransactionHistoryEntry) {
        self.transaction_history.push(entry);
    }

    pub fn serialize_pretty(&self) -> serde_json::Result<String> {
        // §6.2 formatting rules: 2-space indent, LF endings, no BOM; serde_json's
        // pretty printer already emits LF and no BOM, so only indentation needs
        // setting explicitly.
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(self, &mut ser)?;
        Ok(String::from_utf8(buf).expect("serde_json output is valid utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_match_and_component_membership() {
        let mut components = BTreeMap::new();
        components.insert(
            "core".to_string(),
            InstalledComponent {
                version: semver::Version::new(1, 0, 0),
                enabled: true,
                reason: None,
                last_modified: None,
            },
        );
        let metadata = InstallationMetadata {
            version: semver::Version::new(1, 0, 0),
            install_date: Utc::now(),
            last_update_date: None,
            install_mode: InstallMode::Project,
            installed_components: components,
            user_customizations: Vec::new(),
            dependencies: BTreeMap::new(),
            transaction_history: Vec::new(),
        };
        assert!(metadata.matches_target_version(&semver::Version::new(1, 0, 0)));
        assert!(metadata.installed_components_known_to(&["core", "hooks"]));
        assert!(!metadata.installed_components_known_to(&["hooks"]));
    }

    #[test]
    fn serialize_pretty_uses_two_space_indent() {
        let metadata = InstallationMetadata {
            version: semver::Version::new(1, 0, 0),
            install_date: Utc::now(),
            last_update_date: None,
            install_mode: InstallMode::Project,
            installed_components: BTreeMap::new(),
            user_customizations: Vec::new(),
            dependencies: BTreeMap::new(),
            transaction_history: Vec::new(),
        };
        let json = metadata.serialize_pretty().unwrap();
        assert!(json.contains("\n  \"version\""));
        assert!(!json.contains('\r'));
    }
}
