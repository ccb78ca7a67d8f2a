// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path exclusion.
//!
//! Decide whether a path relative to the mirror root must stay out of the
//! mirror. A path is excluded if any pattern either matches its final
//! segment as a shell-style glob, or occurs as a literal substring anywhere in
//! the path.
//!
//! The substring rule is deliberately broader than the glob rule. It lets a
//! user exclude a whole directory by name without writing glob syntax, at the
//! cost of also catching unrelated paths that merely contain the pattern,
//! e.g., `log` excludes `login.json`.

use glob::Pattern;
use std::path::Path;

/// Exclusion pattern set.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    patterns: Vec<(String, Option<Pattern>)>,
}

impl ExclusionMatcher {
    /// Construct new exclusion matcher.
    ///
    /// Empty patterns are dropped. A pattern that is not valid glob syntax is
    /// still used for substring matching.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(Into::into)
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                let glob = Pattern::new(&pattern).ok();
                (pattern, glob)
            })
            .collect();

        Self { patterns }
    }

    /// Check if path relative to mirror root is excluded.
    pub fn should_exclude(&self, relative_path: impl AsRef<Path>) -> bool {
        let path = relative_path.as_ref();
        let full = path.to_string_lossy();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        self.patterns.iter().any(|(literal, glob)| {
            glob.as_ref().is_some_and(|glob| glob.matches(&name)) || full.contains(literal.as_str())
        })
    }

    /// Check if every path below a directory is excluded.
    ///
    /// Only the substring rule is consulted: a glob matching the directory's
    /// own name says nothing about the final segment of the files inside it.
    pub fn excludes_subtree(&self, relative_dir: impl AsRef<Path>) -> bool {
        let full = relative_dir.as_ref().to_string_lossy();
        self.patterns
            .iter()
            .any(|(literal, _)| full.contains(literal.as_str()))
    }
}

/// Check if path relative to mirror root is excluded by any pattern.
pub fn should_exclude(
    relative_path: impl AsRef<Path>,
    patterns: impl IntoIterator<Item = impl Into<String>>,
) -> bool {
    ExclusionMatcher::new(patterns).should_exclude(relative_path)
}
