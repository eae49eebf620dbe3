//! Resource path normalization and overlap tests.
//!
//! Resource identifiers are compared case-insensitively with `/` as the only
//! separator. Intent targets may be plain paths, directory prefixes, or glob
//! patterns (`src/**/*.rs`).

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Normalize a resource path into its identifier form.
///
/// Lowercases, converts `\` to `/`, collapses repeated slashes, drops `.`
/// segments, folds `..` into its parent and drops a trailing slash (the root
/// `/` is kept). A `..` above the root of an absolute path is dropped; one
/// leading a relative path is kept.
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.trim().replace('\\', "/").to_lowercase();
    if replaced.is_empty() {
        return replaced;
    }
    let absolute = replaced.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Resolve a file argument to its identifier and on-disk location.
///
/// Relative paths are taken against the current directory, so `plan.txt`,
/// `./plan.txt` and the absolute spelling all map to one identifier.
pub fn resolve_resource(raw: &str) -> Result<(String, PathBuf)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("path cannot be empty".to_string()));
    }
    let location = std::path::absolute(trimmed)?;
    let key = normalize_path(&location.to_string_lossy());
    Ok((key, location))
}

/// Identifier for a file argument; see [`resolve_resource`].
pub fn resource_key(raw: &str) -> Result<String> {
    resolve_resource(raw).map(|(key, _)| key)
}

/// Whether a target string is a glob pattern rather than a literal path.
pub fn is_pattern(target: &str) -> bool {
    target.contains(['*', '?', '['])
}

/// Check whether two resource targets could refer to the same resources.
///
/// Symmetric. Literal paths overlap when one contains the other after
/// normalization (so a directory overlaps every file beneath it); glob
/// patterns overlap anything they match, and their literal prefix is also
/// compared.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    if glob_matches(&a, &b) || glob_matches(&b, &a) {
        return true;
    }

    let a_base = literal_prefix(&a);
    let b_base = literal_prefix(&b);
    if a_base.is_empty() || b_base.is_empty() {
        // A pattern with no literal part ("**/*.rs") only overlaps what it matches.
        return false;
    }

    a_base.contains(b_base) || b_base.contains(a_base)
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    if !is_pattern(pattern) {
        return false;
    }
    glob::Pattern::new(pattern)
        .map(|compiled| compiled.matches(path))
        .unwrap_or(false)
}

/// The part of a target before its first glob metacharacter, without a trailing slash.
fn literal_prefix(target: &str) -> &str {
    let end = target.find(['*', '?', '[']).unwrap_or(target.len());
    target[..end].trim_end_matches('/')
}
