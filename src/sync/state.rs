// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync state aggregation.
//!
//! Fold repository signals and the live file inventory into one
//! [`SyncState`] snapshot. Every step can fail, and a failure anywhere means
//! no snapshot at all.

use crate::{
    catalog::PathCatalog,
    exclude::ExclusionMatcher,
    fingerprint::Fingerprint,
    path::MirrorRoot,
    sync::{
        copy::{existing_roots, walk_mirror, walk_root, TreeFile},
        sensitive::SensitiveCategory,
        Result, SyncError,
    },
    vcs::MirrorRepository,
};

use chrono::{DateTime, Local};
use std::{
    collections::HashSet,
    fs::metadata,
    path::{Path, PathBuf},
};
use tracing::instrument;

/// Observation of one file in scope for mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Location in the live tree.
    pub path: PathBuf,

    /// Path relative to the mirror root.
    pub rel_path: PathBuf,

    pub size: u64,
    pub modified: DateTime<Local>,
    pub fingerprint: Fingerprint,

    /// File has no counterpart in the mirror yet.
    pub is_new: bool,

    /// File content differs from its mirror counterpart.
    pub is_modified: bool,

    /// File only exists in the mirror. Size, time, and fingerprint describe
    /// the mirror copy.
    pub is_deleted: bool,
}

impl FileRecord {
    /// Check if file differs from the mirror in any way.
    pub fn is_changed(&self) -> bool {
        self.is_new || self.is_modified || self.is_deleted
    }
}

/// Snapshot of everything a caller needs to decide what to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub is_clean: bool,
    pub has_local_changes: bool,
    pub branch: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub files: Vec<FileRecord>,
    pub conflicts: Vec<String>,
}

impl SyncState {
    /// Iterate over files that differ from the mirror.
    pub fn changed_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|file| file.is_changed())
    }

    /// Check if a pull may start right now.
    pub fn can_pull(&self) -> bool {
        !self.has_local_changes && self.conflicts.is_empty()
    }
}

/// Build sync state snapshot.
///
/// Conflicts are the union of whatever the last failed pull reported and the
/// paths the repository still marks as conflicted, so an unresolved merge is
/// visible from any later process too.
///
/// # Errors
///
/// - Return [`SyncError::Vcs`] if repository cannot be queried.
/// - Return [`SyncError::Copy`] if a tree cannot be walked.
/// - Return [`SyncError::Fingerprint`] or [`SyncError::Io`] if a file cannot
///   be inspected.
#[instrument(skip_all, level = "debug")]
pub fn aggregate(
    repo: &impl MirrorRepository,
    catalog: &PathCatalog,
    exclusions: &ExclusionMatcher,
    mirror: &MirrorRoot,
    conflicts: &[String],
) -> Result<SyncState> {
    let is_clean = repo.is_clean()?;
    let has_local_changes = repo.has_changes()?;
    let status = repo.status()?;
    let files = inventory(catalog, exclusions, mirror)?;

    let mut conflicts = conflicts.to_vec();
    conflicts.extend(status.conflicted);
    conflicts.sort();
    conflicts.dedup();

    Ok(SyncState {
        is_clean,
        has_local_changes,
        branch: status.branch,
        ahead: status.ahead,
        behind: status.behind,
        files,
        conflicts,
    })
}

/// Fingerprint every live file in scope and compare it to the mirror.
///
/// Live records come in catalog order. Records for files that only exist in
/// the mirror follow, sorted by path.
///
/// # Errors
///
/// - Return [`SyncError`] if any file cannot be walked or inspected.
pub fn inventory(
    catalog: &PathCatalog,
    exclusions: &ExclusionMatcher,
    mirror: &MirrorRoot,
) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for root in existing_roots(catalog)? {
        for file in walk_root(root, exclusions)? {
            let counterpart = mirror.join(&file.mirror_path);
            let mut record = observe(&file.source, &file.mirror_path)?;
            if counterpart.is_file() {
                record.is_modified = Fingerprint::of_file(&counterpart)? != record.fingerprint;
            } else {
                record.is_new = true;
            }
            seen.insert(file.mirror_path);
            records.push(record);
        }
    }

    let mut deleted = Vec::new();
    for file in walk_mirror(mirror, exclusions)? {
        if seen.contains(&file.mirror_path) || !is_catalogued(catalog, &file) {
            continue;
        }

        let Some(live) = catalog.live_destination(&file.mirror_path) else {
            continue;
        };
        if live.exists() {
            continue;
        }

        let mut record = observe(&file.source, &file.mirror_path)?;
        record.path = live;
        record.is_deleted = true;
        deleted.push(record);
    }
    deleted.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    records.extend(deleted);

    Ok(records)
}

fn is_catalogued(catalog: &PathCatalog, file: &TreeFile) -> bool {
    SensitiveCategory::from_artifact(&file.mirror_path).is_none()
        && catalog
            .list_sync_roots()
            .iter()
            .any(|root| file.mirror_path.starts_with(&root.mirror_name))
}

fn observe(path: &Path, rel_path: &Path) -> Result<FileRecord> {
    let meta = metadata(path).map_err(|err| SyncError::Io {
        source: err,
        path: path.into(),
    })?;
    let modified = meta.modified().map_err(|err| SyncError::Io {
        source: err,
        path: path.into(),
    })?;

    Ok(FileRecord {
        path: path.into(),
        rel_path: rel_path.into(),
        size: meta.len(),
        modified: DateTime::<Local>::from(modified),
        fingerprint: Fingerprint::of_file(path)?,
        is_new: false,
        is_modified: false,
        is_deleted: false,
    })
}
