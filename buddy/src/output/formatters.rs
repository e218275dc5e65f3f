// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Convenience formatters for buddy data.

#![allow(dead_code)]

use colored::Colorize;
use semver::Version;
use std::fmt;

pub(crate) struct NameVersionDisplay<'a> {
    name: &'a str,
    version: &'a Version,
}

impl<'a> NameVersionDisplay<'a> {
    pub(crate) fn component(name: &'a str, version: &'a Version) -> Self {
        Self { name, version }
    }
}

impl<'a> fmt::Display for NameVersionDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name.magenta(), self.version)
    }
}

pub(crate) struct PathList<'a>(pub(crate) &'a [camino::Utf8PathBuf]);

impl<'a> fmt::Display for PathList<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", path.as_str().cyan())?;
        }
        Ok(())
    }
}
