// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Catalog of sync roots.
//!
//! The __path catalog__ is the canonical, ordered listing of files and
//! directories in the live tree that are candidates for mirroring. Each entry
//! is a __sync root__ that maps a source path to the relative name it takes
//! inside of the mirror.
//!
//! Most sync roots live inside of the configuration directory, and keep their
//! path relative to it as their mirror name. External roots live somewhere
//! else entirely, so they are __remapped__ to an explicit mirror name instead.
//! The catalog never checks whether a source path exists. Callers skip missing
//! roots silently.

use crate::path::ConfigurationRoot;

use std::path::{Path, PathBuf};

/// Entries of the configuration directory that get mirrored, in order.
pub const CONFIG_ENTRIES: [&str; 9] = [
    "opencode.json",
    "opencode.jsonc",
    "AGENTS.md",
    "agent",
    "command",
    "skill",
    "mode",
    "themes",
    "plugin",
];

/// Single candidate for mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRoot {
    /// Real location in the live tree.
    pub source: PathBuf,

    /// Path relative to the mirror root.
    pub mirror_name: PathBuf,

    /// Source lives outside of the configuration directory.
    pub remapped: bool,
}

impl SyncRoot {
    /// Map a path relative to the mirror root back into the live tree.
    ///
    /// Returns `None` if the path does not fall under this root, or if it
    /// names the root itself while the root is remapped.
    pub fn live_path_for(&self, mirror_relative: &Path) -> Option<PathBuf> {
        let rest = mirror_relative.strip_prefix(&self.mirror_name).ok()?;
        if rest.as_os_str().is_empty() {
            return (!self.remapped).then(|| self.source.clone());
        }

        Some(self.source.join(rest))
    }
}

/// Deterministic listing of sync roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCatalog {
    config_dir: PathBuf,
    roots: Vec<SyncRoot>,
}

impl PathCatalog {
    /// Build catalog for a configuration root.
    ///
    /// Static configuration entries come first, followed by external roots in
    /// the order they were declared.
    pub fn new(root: &ConfigurationRoot) -> Self {
        let mut roots = CONFIG_ENTRIES
            .iter()
            .map(|entry| SyncRoot {
                source: root.config_dir.join(entry),
                mirror_name: PathBuf::from(entry),
                remapped: false,
            })
            .collect::<Vec<_>>();

        roots.extend(root.external_roots.iter().map(|external| SyncRoot {
            source: external.path.clone(),
            mirror_name: external.mirror_name.clone(),
            remapped: true,
        }));

        Self {
            config_dir: root.config_dir.clone(),
            roots,
        }
    }

    /// List every sync root in catalog order.
    pub fn list_sync_roots(&self) -> &[SyncRoot] {
        &self.roots
    }

    /// Resolve live destination for a path relative to the mirror root.
    ///
    /// Paths under a remapped root's mirror name go to that root's real path
    /// with the prefix stripped. Everything else lands in the configuration
    /// directory under the same relative path. Returns `None` when the path
    /// names a remapped root itself.
    pub fn live_destination(&self, mirror_relative: &Path) -> Option<PathBuf> {
        for root in self.roots.iter().filter(|root| root.remapped) {
            if mirror_relative.starts_with(&root.mirror_name) {
                return root.live_path_for(mirror_relative);
            }
        }

        Some(self.config_dir.join(mirror_relative))
    }
}
