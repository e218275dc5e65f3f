// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The family an error belongs to, matching the stable `code` namespaces an
/// external CLI maps to exit codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transaction,
    Environment,
    Validation,
    Update,
    Uninstall,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transaction => "transaction",
            ErrorKind::Environment => "environment",
            ErrorKind::Validation => "validation",
            ErrorKind::Update => "update",
            ErrorKind::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

/// A structured, user-facing error.
///
/// `code` is the stable string identifier from the spec's error table (e.g.
/// `LOCK_EXISTS`); it is the part of this type an external CLI is expected to
/// match on for exit-code mapping. `context` and `suggestions` are additive
/// and safe to ignore.
#[derive(Clone, Debug, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub context: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Renders the multi-line, user-visible form described in spec §7:
    /// message, then one suggestion per line.
    pub fn to_user_message(&self) -> String {
        let mut out = format!("{} ({})", self.message, self.code);
        for suggestion in &self.suggestions {
            out.push('\n');
            out.push_str("  - ");
            out.push_str(suggestion);
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ---
// Convenience constructors, one per representative code in spec §7.
// ---

macro_rules! error_ctor {
    ($name:ident, $kind:expr, $code:expr) => {
        pub fn $name(message: impl Into<String>) -> Error {
            Error::new($kind, $code, message)
        }
    };
}

error_ctor!(lock_exists, ErrorKind::Transaction, "LOCK_EXISTS");
error_ctor!(lock_stale, ErrorKind::Transaction, "LOCK_STALE");
error_ctor!(interrupted, ErrorKind::Transaction, "INTERRUPTED");
error_ctor!(rollback_failed, ErrorKind::Transaction, "ROLLBACK_FAILED");
error_ctor!(
    checkpoint_invalid,
    ErrorKind::Transaction,
    "CHECKPOINT_INVALID"
);
error_ctor!(action_failed, ErrorKind::Transaction, "ACTION_FAILED");
error_ctor!(commit_failed, ErrorKind::Transaction, "COMMIT_FAILED");

error_ctor!(
    unsupported_platform,
    ErrorKind::Environment,
    "UNSUPPORTED_PLATFORM"
);
error_ctor!(permission_denied, ErrorKind::Environment, "PERMISSION_DENIED");
error_ctor!(disk_space_low, ErrorKind::Environment, "DISK_SPACE_LOW");
error_ctor!(
    dependency_missing,
    ErrorKind::Environment,
    "DEPENDENCY_MISSING"
);
error_ctor!(
    dependency_version_mismatch,
    ErrorKind::Environment,
    "DEPENDENCY_VERSION_MISMATCH"
);
error_ctor!(
    directory_not_writable,
    ErrorKind::Environment,
    "DIRECTORY_NOT_WRITABLE"
);
error_ctor!(git_repo_invalid, ErrorKind::Environment, "GIT_REPO_INVALID");

error_ctor!(invalid_version, ErrorKind::Validation, "INVALID_VERSION");
error_ctor!(invalid_manifest, ErrorKind::Validation, "INVALID_MANIFEST");
error_ctor!(invalid_config, ErrorKind::Validation, "INVALID_CONFIG");
error_ctor!(
    missing_required_field,
    ErrorKind::Validation,
    "MISSING_REQUIRED_FIELD"
);
error_ctor!(
    invalid_field_type,
    ErrorKind::Validation,
    "INVALID_FIELD_TYPE"
);
error_ctor!(
    invalid_field_value,
    ErrorKind::Validation,
    "INVALID_FIELD_VALUE"
);
error_ctor!(schema_mismatch, ErrorKind::Validation, "SCHEMA_MISMATCH");

error_ctor!(not_installed, ErrorKind::Uninstall, "NOT_INSTALLED");

/// Wraps a sub-error with version context, per the `UpdateError` row in spec §7.
pub fn update_error(
    message: impl Into<String>,
    from_version: impl Into<String>,
    to_version: impl Into<String>,
) -> Error {
    Error::new(ErrorKind::Update, "UPDATE_FAILED", message)
        .with_context("from_version", from_version)
        .with_context("to_version", to_version)
}
