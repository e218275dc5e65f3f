// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration: built-in defaults, user-level file, project-level
//! file, environment variables, and flag-provided options, merged deep with
//! arrays replaced, then validated against a fixed schema (§4.7).

use buddy_metadata::error::{self, Result};
use camino::Utf8PathBuf;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;

pub(crate) const USER_CONFIG_FILENAME: &str = ".claude-buddy-rc.json";

/// Built-in defaults for the fixed config keys under `installation`,
/// `update`, `uninstall`, `logging`, `execution`, and `environment`.
pub(crate) fn defaults() -> Value {
    json!({
        "installation": {
            "mode": "project",
            "create_backup": true,
        },
        "update": {
            "merge_strategy": "shallow_merge",
            "backup_retention": 3,
        },
        "uninstall": {
            "purge": false,
            "preserve_customizations": true,
        },
        "logging": {
            "level": "info",
            "color": "auto",
        },
        "execution": {
            "non_interactive": false,
            "dry_run": false,
        },
        "environment": {
            "dependency_timeout_secs": 5,
            "disk_space_floor_mb": 50,
        },
    })
}

/// Flag-provided overrides, the highest-precedence layer. Each field maps to
/// a single dotted config path; `None` means "not provided on the command
/// line", so the layer below shows through.
#[derive(Clone, Debug, Default)]
pub(crate) struct FlagOverrides {
    pub(crate) non_interactive: Option<bool>,
    pub(crate) dry_run: Option<bool>,
    pub(crate) verbose: Option<bool>,
    pub(crate) no_color: Option<bool>,
}

impl FlagOverrides {
    fn to_value(&self) -> Value {
        let mut execution = serde_json::Map::new();
        if let Some(v) = self.non_interactive {
            execution.insert("non_interactive".to_string(), json!(v));
        }
        if let Some(v) = self.dry_run {
            execution.insert("dry_run".to_string(), json!(v));
        }
        let mut logging = serde_json::Map::new();
        if let Some(true) = self.verbose {
            logging.insert("level".to_string(), json!("debug"));
        }
        if let Some(true) = self.no_color {
            logging.insert("color".to_string(), json!("never"));
        }

        let mut top = serde_json::Map::new();
        if !execution.is_empty() {
            top.insert("execution".to_string(), Value::Object(execution));
        }
        if !logging.is_empty() {
            top.insert("logging".to_string(), Value::Object(logging));
        }
        Value::Object(top)
    }
}

/// Reads the environment-variable layer: `CLAUDE_BUDDY_HOME`,
/// `CLAUDE_BUDDY_VERBOSE`, `CLAUDE_BUDDY_NO_COLOR`, `CLAUDE_BUDDY_LOG_LEVEL`,
/// `CLAUDE_BUDDY_NON_INTERACTIVE` (§4.7).
fn env_layer() -> Value {
    let mut logging = serde_json::Map::new();
    let mut execution = serde_json::Map::new();

    if let Ok(level) = env::var("CLAUDE_BUDDY_LOG_LEVEL") {
        logging.insert("level".to_string(), json!(level));
    }
    if env::var("CLAUDE_BUDDY_VERBOSE").is_ok_and(|v| is_truthy(&v)) {
        logging.insert("level".to_string(), json!("debug"));
    }
    if env::var("CLAUDE_BUDDY_NO_COLOR").is_ok_and(|v| is_truthy(&v)) {
        logging.insert("color".to_string(), json!("never"));
    }
    if let Ok(value) = env::var("CLAUDE_BUDDY_NON_INTERACTIVE") {
        execution.insert("non_interactive".to_string(), json!(is_truthy(&value)));
    }

    let mut top = serde_json::Map::new();
    if !logging.is_empty() {
        top.insert("logging".to_string(), Value::Object(logging));
    }
    if !execution.is_empty() {
        top.insert("execution".to_string(), Value::Object(execution));
    }
    Value::Object(top)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `$CLAUDE_BUDDY_HOME` overrides where the user-level config file (and the
/// rest of buddy's home-relative state) lives, the same override hasp's home
/// discovery honours for `HASP_HOME`.
pub(crate) fn home_override() -> Option<Utf8PathBuf> {
    env::var_os("CLAUDE_BUDDY_HOME").map(|value| Utf8PathBuf::from(value.to_string_lossy().into_owned()))
}

fn read_json_file(path: &camino::Utf8Path) -> Value {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

/// Builds the final configuration by merging, in ascending precedence:
/// defaults ← user file ← project file ← env vars ← flags.
pub(crate) fn load(project_dir: &camino::Utf8Path, flags: &FlagOverrides) -> Result<Value> {
    let mut merged = defaults();

    if let Some(home) = home::home_dir().and_then(|p| camino::Utf8PathBuf::from_path_buf(p).ok()) {
        let user_file = home.join(USER_CONFIG_FILENAME);
        merged = crate::merge::deep_merge(&merged, &read_json_file(&user_file));
    }

    let project_file = project_dir.join(USER_CONFIG_FILENAME);
    merged = crate::merge::deep_merge(&merged, &read_json_file(&project_file));
    merged = crate::merge::deep_merge(&merged, &env_layer());
    merged = crate::merge::deep_merge(&merged, &flags.to_value());

    validate(&merged)?;
    Ok(merged)
}

#[derive(Copy, Clone, Debug)]
enum FieldSchema {
    Bool,
    String { allowed: &'static [&'static str] },
    Integer { min: i64, max: i64 },
}

fn schema() -> BTreeMap<&'static str, FieldSchema> {
    BTreeMap::from([
        ("installation.mode", FieldSchema::String { allowed: &["project", "global", "dev"] }),
        ("installation.create_backup", FieldSchema::Bool),
        ("update.merge_strategy", FieldSchema::String { allowed: &["keep_user", "use_new", "shallow_merge", "deep_merge"] }),
        ("update.backup_retention", FieldSchema::Integer { min: 0, max: 100 }),
        ("uninstall.purge", FieldSchema::Bool),
        ("uninstall.preserve_customizations", FieldSchema::Bool),
        ("logging.level", FieldSchema::String { allowed: &["error", "warn", "info", "debug", "trace"] }),
        ("logging.color", FieldSchema::String { allowed: &["auto", "always", "never"] }),
        ("execution.non_interactive", FieldSchema::Bool),
        ("execution.dry_run", FieldSchema::Bool),
        ("environment.dependency_timeout_secs", FieldSchema::Integer { min: 1, max: 60 }),
        ("environment.disk_space_floor_mb", FieldSchema::Integer { min: 1, max: 100_000 }),
    ])
}

/// Validates the merged config against the fixed schema, producing
/// `INVALID_CONFIG` with a dotted field path per violation (§4.7).
fn validate(config: &Value) -> Result<()> {
    for (path, field) in schema() {
        let Some(value) = lookup_dotted(config, path) else {
            continue;
        };
        let ok = match field {
            FieldSchema::Bool => value.is_boolean(),
            FieldSchema::String { allowed } => value
                .as_str()
                .map(|s| allowed.contains(&s))
                .unwrap_or(false),
            FieldSchema::Integer { min, max } => value
                .as_i64()
                .map(|n| n >= min && n <= max)
                .unwrap_or(false),
        };
        if !ok {
            return Err(error::invalid_config(format!("invalid value for '{path}'"))
                .with_context("field", path)
                .with_context("value", value.to_string()));
        }
    }
    Ok(())
}

fn lookup_dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(validate(&defaults()).is_ok());
    }

    #[test]
    fn invalid_enum_value_is_rejected_with_dotted_path() {
        let mut config = defaults();
        config["logging"]["level"] = json!("verbose_please");
        let err = validate(&config).unwrap_err();
        assert_eq!(err.code, "INVALID_CONFIG");
        assert_eq!(err.context.get("field").map(String::as_str), Some("logging.level"));
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        let mut config = defaults();
        config["update"]["backup_retention"] = json!(-1);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn flag_overrides_outrank_everything_below() {
        let flags = FlagOverrides {
            dry_run: Some(true),
            ..Default::default()
        };
        let merged = crate::merge::deep_merge(&defaults(), &flags.to_value());
        assert_eq!(merged["execution"]["dry_run"], json!(true));
    }
}
