// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror copy engine.
//!
//! Copy whole files between the live tree and the mirror. Every copy is a
//! full overwrite that carries over the source's permission bits, so running
//! the same copy twice leaves the destination byte-identical.
//!
//! # Failure Semantics
//!
//! The first file that fails aborts the whole pass. Files copied earlier in
//! the same pass stay where they are. Nothing is rolled back. The next
//! successful pass repairs whatever was left half done.

use crate::{
    catalog::{PathCatalog, SyncRoot},
    exclude::ExclusionMatcher,
    path::MirrorRoot,
};

use ignore::WalkBuilder;
use std::{
    fs::{metadata, DirBuilder, File},
    io::{copy, ErrorKind},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Name of version control metadata that never gets copied.
const VCS_DIR: &str = ".git";

/// Single file found while walking a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    /// Absolute location on disk.
    pub source: PathBuf,

    /// Path relative to the mirror root.
    pub mirror_path: PathBuf,
}

/// Keep only the sync roots that exist on disk.
///
/// # Errors
///
/// - Return [`CopyError::Io`] if a root exists but cannot be inspected.
pub fn existing_roots(catalog: &PathCatalog) -> Result<Vec<&SyncRoot>> {
    let mut roots = Vec::new();
    for root in catalog.list_sync_roots() {
        match metadata(&root.source) {
            Ok(_) => roots.push(root),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("skip missing sync root {:?}", root.source.display());
            }
            Err(err) => {
                return Err(CopyError::Io {
                    source: err,
                    path: root.source.clone(),
                })
            }
        }
    }

    Ok(roots)
}

/// Walk every non-excluded file below a sync root.
///
/// A root that is a plain file yields itself. Files come out sorted by name
/// within each directory.
///
/// # Errors
///
/// - Return [`CopyError::Walk`] if the tree cannot be traversed.
pub fn walk_root(root: &SyncRoot, exclusions: &ExclusionMatcher) -> Result<Vec<TreeFile>> {
    walk(&root.source, &root.mirror_name, exclusions)
}

/// Walk every non-excluded file in the mirror, skipping `.git`.
///
/// A mirror directory that does not exist yet has no files.
///
/// # Errors
///
/// - Return [`CopyError::Walk`] if the tree cannot be traversed.
pub fn walk_mirror(mirror: &MirrorRoot, exclusions: &ExclusionMatcher) -> Result<Vec<TreeFile>> {
    if !mirror.as_path().is_dir() {
        debug!("mirror {:?} does not exist yet", mirror.as_path().display());
        return Ok(Vec::new());
    }

    walk(mirror.as_path(), Path::new(""), exclusions)
}

fn walk(base: &Path, prefix: &Path, exclusions: &ExclusionMatcher) -> Result<Vec<TreeFile>> {
    let filter_base = base.to_path_buf();
    let filter_prefix = prefix.to_path_buf();
    let filter_exclusions = exclusions.clone();

    let walker = WalkBuilder::new(base)
        .standard_filters(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }

            if entry.file_name() == VCS_DIR {
                return false;
            }

            // INVARIANT: Substring exclusion of a directory covers every path below it.
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            !is_dir
                || !filter_exclusions
                    .excludes_subtree(mirror_path(&filter_base, &filter_prefix, entry.path()))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| CopyError::Walk {
            source: err,
            path: base.into(),
        })?;

        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let relative = mirror_path(base, prefix, entry.path());
        if exclusions.should_exclude(&relative) {
            debug!("exclude {:?}", relative.display());
            continue;
        }

        files.push(TreeFile {
            source: entry.into_path(),
            mirror_path: relative,
        });
    }

    Ok(files)
}

fn mirror_path(base: &Path, prefix: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rest) if rest.as_os_str().is_empty() => prefix.to_path_buf(),
        Ok(rest) => prefix.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Copy every non-excluded file of every existing sync root into the mirror.
///
/// Returns the number of files copied.
///
/// # Errors
///
/// - Return [`CopyError`] on the first file that cannot be walked or copied.
#[instrument(skip(catalog, exclusions, mirror), level = "debug")]
pub fn export_roots(
    catalog: &PathCatalog,
    exclusions: &ExclusionMatcher,
    mirror: &MirrorRoot,
) -> Result<usize> {
    let mut count = 0;
    for root in existing_roots(catalog)? {
        for file in walk_root(root, exclusions)? {
            copy_file(&file.source, &mirror.join(&file.mirror_path))?;
            count += 1;
        }
    }

    Ok(count)
}

/// Copy single mirror file back into the live tree.
///
/// Returns `false` if the file has no live destination.
///
/// # Errors
///
/// - Return [`CopyError::Io`] if the file cannot be copied.
pub fn import_file(catalog: &PathCatalog, file: &TreeFile) -> Result<bool> {
    match catalog.live_destination(&file.mirror_path) {
        Some(destination) => {
            copy_file(&file.source, &destination)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Copy file, overwriting the destination and preserving permission bits.
///
/// Missing parent directories of the destination are created with mode
/// `0755`.
///
/// # Errors
///
/// - Return [`CopyError::Io`] with the failing path if any step fails.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        create_dirs(parent)?;
    }

    let mut reader = File::open(src).map_err(|err| CopyError::Io {
        source: err,
        path: src.into(),
    })?;
    let permissions = reader
        .metadata()
        .map_err(|err| CopyError::Io {
            source: err,
            path: src.into(),
        })?
        .permissions();

    make_writable(dst)?;
    let mut writer = File::create(dst).map_err(|err| CopyError::Io {
        source: err,
        path: dst.into(),
    })?;
    copy(&mut reader, &mut writer).map_err(|err| CopyError::Io {
        source: err,
        path: dst.into(),
    })?;
    writer.set_permissions(permissions).map_err(|err| CopyError::Io {
        source: err,
        path: dst.into(),
    })?;

    Ok(())
}

/// Create directory and all of its parents.
///
/// # Errors
///
/// - Return [`CopyError::Io`] if directory cannot be created.
pub fn create_dirs(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }

    builder.create(path).map_err(|err| CopyError::Io {
        source: err,
        path: path.into(),
    })
}

// INVARIANT: A read-only file left by an earlier pass still gets overwritten.
fn make_writable(path: &Path) -> Result<()> {
    let Ok(meta) = metadata(path) else {
        return Ok(());
    };

    let mut permissions = meta.permissions();
    if !permissions.readonly() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }

    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);

    std::fs::set_permissions(path, permissions).map_err(|err| CopyError::Io {
        source: err,
        path: path.into(),
    })
}

/// Mirror copy error types.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// Directory tree cannot be traversed.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// File cannot be read, written, or created.
    #[error("failed to copy {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl CopyError {
    /// Path that caused the failure.
    pub fn path(&self) -> &Path {
        match self {
            Self::Walk { path, .. } | Self::Io { path, .. } => path.as_path(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = CopyError> = std::result::Result<T, E>;
