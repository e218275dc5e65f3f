// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Error};
use std::cmp::Ordering;

/// Parses a strict `X.Y.Z` version string (the Updater's variant from spec
/// §4.5.1). Unlike `semver::Version` this rejects missing segments outright;
/// pre-release and build metadata are accepted and compared the way
/// `semver::Version`'s `Ord` impl already does.
pub fn parse_strict(version: &str) -> error::Result<semver::Version> {
    let parsed: semver::Version = version
        .parse()
        .map_err(|_| error::invalid_version(format!("'{}' is not a valid semver version", version)))?;
    Ok(parsed)
}

/// Compares two versions using the three-field numeric rule from spec §4.5.1:
/// a strict `X.Y.Z` total order. Pre-release tags are ignored for the
/// majority-ordering decision described there (numeric triple only), matching
/// the plain "`X.Y.Z > A.B.C` iff lexicographic comparison on triples holds"
/// testable property in spec §8.1 item 7.
pub fn compare_versions(a: &semver::Version, b: &semver::Version) -> Ordering {
    (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
}

/// Lenient three-field compare for the Env Probe's dependency-version
/// variant (spec §4.1): missing segments are treated as zero, so `"18"`,
/// `"18.17"`, and `"18.17.0"` all compare equal.
pub fn compare_lenient(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_lenient_triple(a)?.cmp(&parse_lenient_triple(b)?))
}

fn parse_lenient_triple(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .fuse();
    let major = parts.next().flatten().unwrap_or(0);
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// Extracts the first `\d+\.\d+\.\d+` substring from dependency-probe output,
/// per spec §4.1 ("Parse first `\d+\.\d+\.\d+` in output").
pub fn extract_first_semver(output: &str) -> Option<String> {
    let bytes = output.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            if let Some(end) = match_triple(&output[i..]) {
                return Some(output[i..i + end].to_string());
            }
        }
        i += 1;
    }
    None
}

/// Returns the byte length of a `\d+\.\d+\.\d+` match anchored at the start
/// of `s`, if one exists.
fn match_triple(s: &str) -> Option<usize> {
    let mut chars = s.char_indices().peekable();
    let mut dots = 0;
    let mut last_was_digit = false;
    let mut end = 0;

    for (idx, c) in chars.by_ref() {
        if c.is_ascii_digit() {
            last_was_digit = true;
            end = idx + 1;
        } else if c == '.' && last_was_digit && dots < 2 {
            dots += 1;
            last_was_digit = false;
            end = idx + 1;
        } else {
            break;
        }
    }

    if dots == 2 && last_was_digit {
        Some(end)
    } else {
        None
    }
}

/// Whether `from` to `to` represents a version downgrade under the strict
/// three-field compare (spec §4.5.1). A downgrade is never blocked, only
/// flagged.
pub fn is_downgrade(from: &semver::Version, to: &semver::Version) -> bool {
    compare_versions(to, from) == Ordering::Less
}

pub fn parse_or_err(version: &str) -> error::Result<semver::Version> {
    parse_strict(version)
}

pub fn is_err_invalid(err: &Error) -> bool {
    err.code == "INVALID_VERSION"
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strict_compare_matches_lexicographic_triples() {
        let a: semver::Version = "1.2.3".parse().unwrap();
        let b: semver::Version = "1.10.0".parse().unwrap();
        assert_eq!(compare_versions(&a, &b), Ordering::Less);
    }

    #[test]
    fn lenient_compare_treats_missing_segments_as_zero() {
        assert_eq!(compare_lenient("18", "18.0.0"), Some(Ordering::Equal));
        assert_eq!(compare_lenient("18.17", "18.17.0"), Some(Ordering::Equal));
        assert_eq!(compare_lenient("18.2", "18.17"), Some(Ordering::Less));
    }

    #[test]
    fn extract_first_semver_finds_embedded_triple() {
        assert_eq!(
            extract_first_semver("v18.17.1\n"),
            Some("18.17.1".to_string())
        );
        assert_eq!(
            extract_first_semver("uv 0.1.44 (abcdef 2024-01-01)"),
            Some("0.1.44".to_string())
        );
        assert_eq!(extract_first_semver("no version here"), None);
    }

    #[test]
    fn downgrade_detection() {
        let from: semver::Version = "2.0.0".parse().unwrap();
        let to: semver::Version = "1.9.9".parse().unwrap();
        assert!(is_downgrade(&from, &to));
        assert!(!is_downgrade(&to, &from));
    }

    proptest! {
        #[test]
        fn compare_versions_total_order(
            a in (0u64..5, 0u64..5, 0u64..5),
            b in (0u64..5, 0u64..5, 0u64..5),
        ) {
            let va = semver::Version::new(a.0, a.1, a.2);
            let vb = semver::Version::new(b.0, b.1, b.2);
            // antisymmetric
            if compare_versions(&va, &vb) == Ordering::Less {
                prop_assert_eq!(compare_versions(&vb, &va), Ordering::Greater);
            }
            // reflexive
            prop_assert_eq!(compare_versions(&va, &va), Ordering::Equal);
        }
    }
}
