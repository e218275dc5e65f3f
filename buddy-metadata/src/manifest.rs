// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Error};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The dependency names the manifest is allowed to reference (§3.1 invariant
/// iii). Kept as a closed enum rather than a free string so an unknown
/// dependency name is a validation error, not a silently-ignored typo.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyName {
    Node,
    Uv,
    Python,
    Git,
}

impl DependencyName {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyName::Node => "node",
            DependencyName::Uv => "uv",
            DependencyName::Python => "python",
            DependencyName::Git => "git",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "node" => Some(DependencyName::Node),
            "uv" => Some(DependencyName::Uv),
            "python" => Some(DependencyName::Python),
            "git" => Some(DependencyName::Git),
            _ => None,
        }
    }
}

impl std::fmt::Display for DependencyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Required,
    Optional,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Darwin,
    Linux,
}

impl Platform {
    pub fn current() -> error::Result<Self> {
        match std::env::consts::OS {
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::Darwin),
            "linux" => Ok(Platform::Linux),
            other => Err(error::unsupported_platform(format!(
                "platform '{other}' is not one of windows, darwin, linux"
            ))),
        }
    }
}

/// One declared component. `source`/`target` are always relative; validation
/// rejects absolute paths and `..`-escaping paths (§3.1 invariant ii, and the
/// Open Question in spec Design Notes resolved in DESIGN.md).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub source: Utf8PathBuf,
    pub target: Utf8PathBuf,
    #[serde(default)]
    pub dependencies: Vec<DependencyName>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affected_features: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectorySpec {
    pub path: Utf8PathBuf,
    /// Octal permission string, e.g. `"755"`. Ignored on Windows.
    pub permissions: String,
    pub create_if_missing: bool,
}

/// Shallow per-platform overrides merged into the matching component or
/// directory during `build_for_platform`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlatformOverrides {
    #[serde(default)]
    pub component_overrides: BTreeMap<String, ComponentOverride>,
    #[serde(default)]
    pub directory_overrides: BTreeMap<String, DirectoryOverride>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComponentOverride {
    pub target: Option<Utf8PathBuf>,
    pub file_patterns: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirectoryOverride {
    pub permissions: Option<String>,
    pub create_if_missing: Option<bool>,
}

/// Process-wide, read-only after construction (§3.1). Produced once per
/// operation by `build_for_platform`; never mutated afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: semver::Version,
    pub components: Vec<Component>,
    pub directories: Vec<DirectorySpec>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of dependency filtering (§4.2): components partitioned into those
/// still taking part in the operation (`enabled`, possibly carrying
/// `dependency_issues` for required components) and those excluded
/// (`disabled`, with a reason).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilteredManifest {
    pub enabled: Vec<EnabledComponent>,
    pub disabled: Vec<DisabledComponent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnabledComponent {
    pub component: Component,
    pub dependency_issues: Vec<DependencyName>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisabledComponent {
    pub component: Component,
    pub disabled_reason: String,
}

/// Returns `true` when a relative path, once normalized, stays within the
/// install root — i.e. it never carries a `..` segment that would climb
/// above the starting directory. Rejects absolute paths outright.
pub fn is_safe_relative_path(path: &camino::Utf8Path) -> bool {
    if path.is_absolute() {
        return false;
    }
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            camino::Utf8Component::Normal(_) => depth += 1,
            camino::Utf8Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            camino::Utf8Component::CurDir => {}
            _ => return false,
        }
    }
    true
}

/// Deep-copies `base` and merges `overrides` into it for the given platform,
/// per §4.2's "returns a deep copy, source never mutated" rule.
pub fn build_for_platform(base: &Manifest, overrides: &PlatformOverrides) -> Manifest {
    let mut result = base.clone();

    for component in &mut result.components {
        if let Some(over) = overrides.component_overrides.get(&component.name) {
            if let Some(target) = &over.target {
                component.target = target.clone();
            }
            if let Some(patterns) = &over.file_patterns {
                component.file_patterns = patterns.clone();
            }
        }
    }

    for directory in &mut result.directories {
        if let Some(over) = overrides.directory_overrides.get(directory.path.as_str()) {
            if let Some(permissions) = &over.permissions {
                directory.permissions = permissions.clone();
            }
            if let Some(create) = over.create_if_missing {
                directory.create_if_missing = create;
            }
        }
    }

    result.environment_variables = overrides.environment_variables.clone();
    result
}

/// Partitions components into enabled/disabled based on dependency
/// availability (§4.2). `available` is the set of dependency names the Env
/// Probe reported as present.
pub fn filter_by_dependencies(
    manifest: &Manifest,
    available: &BTreeSet<DependencyName>,
) -> FilteredManifest {
    let mut enabled = Vec::new();
    let mut disabled = Vec::new();

    for component in &manifest.components {
        let missing: Vec<DependencyName> = component
            .dependencies
            .iter()
            .copied()
            .filter(|dep| !available.contains(dep))
            .collect();

        if missing.is_empty() {
            enabled.push(EnabledComponent {
                component: component.clone(),
                dependency_issues: Vec::new(),
            });
            continue;
        }

        match component.component_type {
            ComponentType::Required => enabled.push(EnabledComponent {
                component: component.clone(),
                dependency_issues: missing,
            }),
            ComponentType::Optional => {
                let names: Vec<&str> = missing.iter().map(|d| d.as_str()).collect();
                disabled.push(DisabledComponent {
                    disabled_reason: format!("Missing dependencies: {}", names.join(", ")),
                    component: component.clone(),
                });
            }
        }
    }

    FilteredManifest { enabled, disabled }
}

/// Pure diagnostic pass over a manifest; never raises, only reports (§4.2).
pub fn validate(manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_names = BTreeSet::new();
    for component in &manifest.components {
        if !seen_names.insert(component.name.as_str()) {
            errors.push(ValidationError::new(
                format!("components[{}].name", component.name),
                "duplicate component name",
            ));
        }

        if !is_safe_relative_path(&component.source) {
            errors.push(ValidationError::new(
                format!("components[{}].source", component.name),
                format!("'{}' must be relative and non-escaping", component.source),
            ));
        }
        if !is_safe_relative_path(&component.target) {
            errors.push(ValidationError::new(
                format!("components[{}].target", component.name),
                format!("'{}' must be relative and non-escaping", component.target),
            ));
        }
    }

    for directory in &manifest.directories {
        if !is_safe_relative_path(&directory.path) {
            errors.push(ValidationError::new(
                format!("directories[{}].path", directory.path),
                format!("'{}' must be relative and non-escaping", directory.path),
            ));
        }
        if u32::from_str_radix(&directory.permissions, 8).is_err() {
            errors.push(ValidationError::new(
                format!("directories[{}].permissions", directory.path),
                format!("'{}' is not a valid octal permission string", directory.permissions),
            ));
        }
    }

    errors
}

pub fn validation_to_error(errors: &[ValidationError]) -> Error {
    let mut err = error::invalid_manifest(format!("{} validation error(s)", errors.len()));
    for (i, e) in errors.iter().enumerate() {
        err = err.with_context(format!("error[{i}].field"), e.field.clone());
        err = err.with_context(format!("error[{i}].message"), e.message.clone());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_component(name: &str, deps: Vec<DependencyName>) -> Component {
        Component {
            name: name.to_string(),
            display_name: name.to_string(),
            component_type: ComponentType::Optional,
            source: "personas".into(),
            target: ".claude-buddy/personas".into(),
            dependencies: deps,
            file_patterns: vec!["*.md".to_string()],
            description: String::new(),
            affected_features: Vec::new(),
        }
    }

    #[test]
    fn safe_relative_path_rejects_traversal_and_absolute() {
        assert!(is_safe_relative_path(camino::Utf8Path::new("a/b")));
        assert!(is_safe_relative_path(camino::Utf8Path::new("a/../b")));
        assert!(!is_safe_relative_path(camino::Utf8Path::new("../b")));
        assert!(!is_safe_relative_path(camino::Utf8Path::new("a/../../b")));
        assert!(!is_safe_relative_path(camino::Utf8Path::new("/etc/passwd")));
    }

    #[test]
    fn optional_component_with_missing_dep_is_disabled() {
        let manifest = Manifest {
            schema_version: semver::Version::new(1, 0, 0),
            components: vec![sample_component("hooks", vec![DependencyName::Uv])],
            directories: Vec::new(),
            environment_variables: BTreeMap::new(),
        };
        let available = BTreeSet::new();
        let result = filter_by_dependencies(&manifest, &available);
        assert_eq!(result.enabled.len(), 0);
        assert_eq!(result.disabled.len(), 1);
        assert_eq!(result.disabled[0].disabled_reason, "Missing dependencies: uv");
    }

    #[test]
    fn required_component_with_missing_dep_stays_enabled_with_issues() {
        let mut component = sample_component("core", vec![DependencyName::Node]);
        component.component_type = ComponentType::Required;
        let manifest = Manifest {
            schema_version: semver::Version::new(1, 0, 0),
            components: vec![component],
            directories: Vec::new(),
            environment_variables: BTreeMap::new(),
        };
        let result = filter_by_dependencies(&manifest, &BTreeSet::new());
        assert_eq!(result.enabled.len(), 1);
        assert_eq!(result.enabled[0].dependency_issues, vec![DependencyName::Node]);
        assert!(result.disabled.is_empty());
    }

    #[test]
    fn components_with_no_dependencies_always_enabled() {
        let manifest = Manifest {
            schema_version: semver::Version::new(1, 0, 0),
            components: vec![sample_component("templates", vec![])],
            directories: Vec::new(),
            environment_variables: BTreeMap::new(),
        };
        let result = filter_by_dependencies(&manifest, &BTreeSet::new());
        assert_eq!(result.enabled.len(), 1);
        assert!(result.enabled[0].dependency_issues.is_empty());
    }

    #[test]
    fn validate_flags_duplicate_names_and_bad_permissions() {
        let manifest = Manifest {
            schema_version: semver::Version::new(1, 0, 0),
            components: vec![
                sample_component("dup", vec![]),
                sample_component("dup", vec![]),
            ],
            directories: vec![DirectorySpec {
                path: "x".into(),
                permissions: "999".to_string(),
                create_if_missing: true,
            }],
            environment_variables: BTreeMap::new(),
        };
        let errors = validate(&manifest);
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
        assert!(errors.iter().any(|e| e.message.contains("octal")));
    }

    #[test]
    fn build_for_platform_does_not_mutate_source() {
        let base = Manifest {
            schema_version: semver::Version::new(1, 0, 0),
            components: vec![sample_component("hooks", vec![])],
            directories: Vec::new(),
            environment_variables: BTreeMap::new(),
        };
        let mut overrides = PlatformOverrides::default();
        overrides.component_overrides.insert(
            "hooks".to_string(),
            ComponentOverride {
                target: Some(".claude/hooks".into()),
                file_patterns: None,
            },
        );
        let resolved = build_for_platform(&base, &overrides);
        assert_eq!(resolved.components[0].target, Utf8PathBuf::from(".claude/hooks"));
        assert_eq!(base.components[0].target, Utf8PathBuf::from(".claude-buddy/personas"));
    }
}
