// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Error;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Warning {
    pub code: &'static str,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Utf8PathBuf>,
}

impl Warning {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// The single result value returned per operation (§6.3), the core's only
/// externally visible output besides structured log events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub duration_ms: u64,
    pub updated_or_installed_files: Vec<Utf8PathBuf>,
    pub preserved_files: Vec<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_files: Option<Vec<Utf8PathBuf>>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<Error>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<Utf8PathBuf>,
}

impl OperationResult {
    pub fn empty(success: bool, duration_ms: u64) -> Self {
        Self {
            success,
            duration_ms,
            updated_or_installed_files: Vec::new(),
            preserved_files: Vec::new(),
            removed_files: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            backup_path: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.success && self.warnings.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_defaults_to_no_side_effects() {
        let result = OperationResult::empty(true, 10);
        assert!(result.is_clean());
        assert!(result.backup_path.is_none());
        assert!(result.removed_files.is_none());
    }
}
