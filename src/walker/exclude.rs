// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Path-exclusion is an optional extension point (spec §4.D.1: "the
//! core defines it as an interface"); these are its default
//! implementations.

use std::path::Path;

/// Decides whether a path should be skipped entirely during the walk.
pub trait ExcludeFilter: Send + Sync {
    /// Returns true if `path` (and, for a directory, its subtree)
    /// should be skipped.
    fn excludes(&self, path: &Path) -> bool;
}

/// Excludes nothing; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclude;

impl ExcludeFilter for NoExclude {
    fn excludes(&self, _path: &Path) -> bool {
        false
    }
}

/// Excludes paths whose file name matches one of a set of simple
/// glob patterns (only `*` is supported, matching any run of
/// characters — enough for `.git`, `*.tmp`, `node_modules` style
/// ignore lists without pulling in a full glob engine).
#[derive(Debug, Clone, Default)]
pub struct GlobSetExclude {
    patterns: Vec<String>,
}

impl GlobSetExclude {
    /// Builds a filter from a set of `*`-glob patterns, matched
    /// against each path component's file name.
    #[must_use]
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { patterns: patterns.into_iter().map(Into::into).collect() }
    }

    fn matches_name(pattern: &str, name: &str) -> bool {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 1 {
            return pattern == name;
        }

        let mut rest = name;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                let Some(stripped) = rest.strip_prefix(part) else { return false };
                rest = stripped;
            } else if i == parts.len() - 1 {
                return rest.ends_with(part);
            } else if let Some(idx) = rest.find(part) {
                rest = rest.get(idx + part.len()..).unwrap_or("");
            } else {
                return false;
            }
        }
        true
    }
}

impl ExcludeFilter for GlobSetExclude {
    fn excludes(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { return false };
        self.patterns.iter().any(|p| Self::matches_name(p, name))
    }
}
