// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control capability.
//!
//! The mirror is a plain Git working copy. Oxisync never reaches into its
//! metadata directly. Instead, every repository operation goes through the
//! narrow [`MirrorRepository`] interface, while construction goes through
//! [`MirrorAccess`].
//!
//! # Backends
//!
//! Two interchangeable backends exist:
//!
//! 1. [`LibGitMirror`] drives the repository in-process through libgit2.
//! 2. [`SystemMirror`] shells out to the `git` binary, inheriting whatever
//!    credential helpers and SSH setup the user already has.
//!
//! [`AnyMirror`] wraps both, so the backend can be selected at startup.
//!
//! # Distinguished Failures
//!
//! Merge conflicts and authentication failures are reported as
//! [`VcsError::Conflict`] and [`VcsError::Auth`]. Callers react to those
//! differently. Everything else is an opaque failure.

pub mod libgit;
pub mod system;

pub use libgit::{IndicatifPrompter, LibGitMirror};
pub use system::SystemMirror;

use indicatif::ProgressBar;
use std::path::Path;

/// Name of the remote the mirror pushes to and pulls from.
pub const ORIGIN: &str = "origin";

/// Construct handles to a mirror repository.
pub trait MirrorAccess: Sized {
    /// Initialize a new repository whose unborn HEAD points at `branch`.
    fn try_init(path: impl AsRef<Path>, branch: impl AsRef<str>) -> Result<Self>;

    /// Open existing repository.
    fn try_open(path: impl AsRef<Path>) -> Result<Self>;

    /// Clone repository from remote.
    ///
    /// If the remote is still empty, HEAD is pointed at `branch` so the first
    /// push creates it.
    fn try_clone(
        url: impl AsRef<str>,
        path: impl AsRef<Path>,
        branch: impl AsRef<str>,
        bar: ProgressBar,
    ) -> Result<Self>;
}

/// Operations the sync engine needs from a mirror repository.
pub trait MirrorRepository {
    /// Add a named remote.
    fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// URL of a named remote.
    fn remote_url(&self, name: &str) -> Result<String>;

    /// Point a named remote at a new URL.
    fn set_remote_url(&self, name: &str, url: &str) -> Result<()>;

    /// Current working tree status.
    fn status(&self) -> Result<RepoStatus>;

    /// Check if working tree is clean.
    ///
    /// Clean means no changed paths, an attached HEAD, and no merge in
    /// progress.
    fn is_clean(&self) -> Result<bool> {
        Ok(self.status()?.is_clean())
    }

    /// Check if working tree has uncommitted changes.
    fn has_changes(&self) -> Result<bool> {
        Ok(self.status()?.has_changes())
    }

    /// Stage every change, including deletions and untracked files.
    ///
    /// Staging a conflicted path marks it as resolved.
    fn add_all(&self) -> Result<()>;

    /// Commit staged changes.
    ///
    /// If a merge is in progress, the commit concludes it.
    fn commit(&self, message: &str) -> Result<()>;

    /// Patch of the working tree against HEAD, untracked files included.
    fn diff(&self) -> Result<String>;

    /// Push current branch to origin.
    fn push(&self) -> Result<()>;

    /// Push current branch to origin, overwriting remote history.
    fn force_push(&self) -> Result<()>;

    /// Fetch from origin and merge into current branch.
    ///
    /// A conflicting merge is left in progress, with conflict markers
    /// written into the working tree, just like `git pull` does.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Conflict`] if the merge cannot be completed
    ///   without manual resolution.
    /// - Return [`VcsError::Auth`] if origin rejects the credentials.
    fn pull(&self) -> Result<()>;

    /// Fetch from origin without merging.
    fn fetch(&self) -> Result<()>;

    /// Name of the checked out branch.
    fn branch(&self) -> Result<String>;
}

/// Snapshot of repository status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    /// Checked out branch, `None` if HEAD is detached.
    pub branch: Option<String>,

    /// A merge or similar operation is still in progress.
    pub merging: bool,

    pub untracked: Vec<String>,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
    pub conflicted: Vec<String>,

    /// Commits on the local branch missing from its upstream. Every commit
    /// counts if the branch was never pushed.
    pub ahead: usize,

    /// Commits on the upstream missing from the local branch.
    pub behind: usize,
}

impl RepoStatus {
    /// Iterate over every changed path.
    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.untracked
            .iter()
            .chain(&self.modified)
            .chain(&self.staged)
            .chain(&self.conflicted)
            .map(String::as_str)
    }

    /// Check for uncommitted changes.
    pub fn has_changes(&self) -> bool {
        self.changed_paths().next().is_some()
    }

    /// Check if working tree is clean.
    pub fn is_clean(&self) -> bool {
        !self.has_changes() && self.branch.is_some() && !self.merging
    }
}

/// Selectable repository backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process libgit2.
    #[default]
    LibGit,

    /// External `git` binary.
    System,
}

impl Backend {
    /// Open mirror with this backend.
    pub fn open(self, path: impl AsRef<Path>) -> Result<AnyMirror> {
        Ok(match self {
            Self::LibGit => AnyMirror::LibGit(LibGitMirror::try_open(path)?),
            Self::System => AnyMirror::System(SystemMirror::try_open(path)?),
        })
    }

    /// Initialize mirror with this backend.
    pub fn init(self, path: impl AsRef<Path>, branch: impl AsRef<str>) -> Result<AnyMirror> {
        Ok(match self {
            Self::LibGit => AnyMirror::LibGit(LibGitMirror::try_init(path, branch)?),
            Self::System => AnyMirror::System(SystemMirror::try_init(path, branch)?),
        })
    }

    /// Clone mirror with this backend.
    pub fn clone_from(
        self,
        url: impl AsRef<str>,
        path: impl AsRef<Path>,
        branch: impl AsRef<str>,
        bar: ProgressBar,
    ) -> Result<AnyMirror> {
        Ok(match self {
            Self::LibGit => AnyMirror::LibGit(LibGitMirror::try_clone(url, path, branch, bar)?),
            Self::System => AnyMirror::System(SystemMirror::try_clone(url, path, branch, bar)?),
        })
    }
}

/// Mirror repository with a backend chosen at runtime.
#[derive(Debug)]
pub enum AnyMirror {
    LibGit(LibGitMirror),
    System(SystemMirror),
}

impl AnyMirror {
    fn inner(&self) -> &dyn MirrorRepository {
        match self {
            Self::LibGit(mirror) => mirror,
            Self::System(mirror) => mirror,
        }
    }
}

impl MirrorRepository for AnyMirror {
    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.inner().add_remote(name, url)
    }

    fn remote_url(&self, name: &str) -> Result<String> {
        self.inner().remote_url(name)
    }

    fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.inner().set_remote_url(name, url)
    }

    fn status(&self) -> Result<RepoStatus> {
        self.inner().status()
    }

    fn add_all(&self) -> Result<()> {
        self.inner().add_all()
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.inner().commit(message)
    }

    fn diff(&self) -> Result<String> {
        self.inner().diff()
    }

    fn push(&self) -> Result<()> {
        self.inner().push()
    }

    fn force_push(&self) -> Result<()> {
        self.inner().force_push()
    }

    fn pull(&self) -> Result<()> {
        self.inner().pull()
    }

    fn fetch(&self) -> Result<()> {
        self.inner().fetch()
    }

    fn branch(&self) -> Result<String> {
        self.inner().branch()
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Merge needs manual resolution.
    #[error("merge conflict in {} file(s): {}", files.len(), files.join(", "))]
    Conflict { files: Vec<String> },

    /// Remote rejected credentials.
    #[error("authentication failed for remote {remote}: {message}")]
    Auth { remote: String, message: String },

    /// Remote refused to update a reference.
    #[error("push to {remote} rejected: {message}")]
    Rejected { remote: String, message: String },

    /// HEAD does not point at a branch.
    #[error("HEAD is detached, check out a branch first")]
    DetachedHead,

    /// Remote is not configured.
    #[error("remote {0:?} is not configured")]
    MissingRemote(String),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// External git process fails.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
