// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The manifest's content is embedded as a compile-time constant (§4.2): a
//! hard-coded declaration of components and directories, not loaded from an
//! external file.

use buddy_metadata::manifest::{
    Component, ComponentType, DependencyName, DirectorySpec, Manifest, PlatformOverrides,
};

pub(crate) const SCHEMA_VERSION_STR: &str = "1.0.0";

fn component(
    name: &str,
    component_type: ComponentType,
    source: &str,
    target: &str,
    dependencies: Vec<DependencyName>,
    file_patterns: Vec<&str>,
    description: &str,
) -> Component {
    Component {
        name: name.to_string(),
        display_name: name.to_string(),
        component_type,
        source: source.into(),
        target: target.into(),
        dependencies,
        file_patterns: file_patterns.into_iter().map(String::from).collect(),
        description: description.to_string(),
        affected_features: Vec::new(),
    }
}

fn directory(path: &str) -> DirectorySpec {
    DirectorySpec {
        path: path.into(),
        permissions: "755".to_string(),
        create_if_missing: true,
    }
}

/// The base, platform-unresolved manifest. Call `build_for_platform` on this
/// to obtain the deep copy each operation actually works with.
pub(crate) fn base_manifest() -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION_STR.parse().expect("embedded schema version is valid semver"),
        components: vec![
            component(
                "foundation",
                ComponentType::Required,
                "directive",
                "directive",
                vec![],
                vec!["*.md"],
                "The foundation document all personas and commands are grounded in.",
            ),
            component(
                "personas",
                ComponentType::Optional,
                "personas",
                ".claude-buddy/personas",
                vec![],
                vec!["*.md"],
                "Persona definitions.",
            ),
            component(
                "templates",
                ComponentType::Optional,
                "templates",
                ".claude-buddy/templates",
                vec![],
                vec!["*.md", "*.json"],
                "Scaffolding templates.",
            ),
            component(
                "context",
                ComponentType::Optional,
                "context",
                ".claude-buddy/context",
                vec![],
                vec!["*.md"],
                "Project context documents.",
            ),
            component(
                "hooks",
                ComponentType::Optional,
                "hooks",
                ".claude/hooks",
                vec![DependencyName::Uv],
                vec!["*.py"],
                "Lifecycle hooks run through uv.",
            ),
            component(
                "commands",
                ComponentType::Optional,
                "commands",
                ".claude/commands",
                vec![],
                vec!["*.md"],
                "Slash command definitions.",
            ),
            component(
                "agents",
                ComponentType::Optional,
                "agents",
                ".claude/agents",
                vec![],
                vec!["*.md"],
                "Subagent definitions.",
            ),
        ],
        directories: vec![
            directory(".claude-buddy"),
            directory(".claude"),
            directory("directive"),
            directory(".claude-buddy/personas"),
            directory(".claude-buddy/templates"),
            directory(".claude-buddy/context"),
            directory(".claude/hooks"),
            directory(".claude/commands"),
            directory(".claude/agents"),
        ],
        environment_variables: Default::default(),
    }
}

/// `*.py` files install executable (§4.4 step 4); everything else is `644`.
pub(crate) fn target_permissions_for(path: &camino::Utf8Path) -> &'static str {
    if path.extension() == Some("py") {
        "755"
    } else {
        "644"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_manifest_has_seven_components() {
        assert_eq!(base_manifest().components.len(), 7);
    }

    #[test]
    fn base_manifest_validates_clean() {
        let manifest = base_manifest();
        let errors = buddy_metadata::manifest::validate(&manifest);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn python_files_get_executable_permissions() {
        assert_eq!(target_permissions_for(camino::Utf8Path::new("pre_commit.py")), "755");
        assert_eq!(target_permissions_for(camino::Utf8Path::new("README.md")), "644");
    }

    #[test]
    fn build_for_platform_round_trips_with_empty_overrides() {
        let base = base_manifest();
        let resolved = buddy_metadata::manifest::build_for_platform(&base, &PlatformOverrides::default());
        assert_eq!(resolved.components.len(), base.components.len());
    }
}
