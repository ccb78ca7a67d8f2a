// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Synchronization engine.
//!
//! Keep the live configuration tree of OpenCode consistent with a
//! version-controlled __mirror__, so the same configuration can be reproduced
//! on any number of machines.
//!
//! # Directions
//!
//! The engine moves files in two directions:
//!
//! 1. __Export__ copies every catalogued file that is not excluded from the
//!    live tree into the mirror, and encrypts enabled sensitive files into
//!    their artifacts.
//! 2. __Import__ walks the mirror, and copies every file that is not excluded
//!    back to its live destination, decrypting artifacts along the way.
//!
//! Both directions are idempotent whole-file overwrites. Neither is atomic.
//! The first failing file aborts the pass, and files copied before it stay
//! copied.
//!
//! # Sync Cycle
//!
//! The composite sync cycle is a pull followed by a push:
//!
//! ```text
//! Start --local changes--> BlockedLocalChanges
//!   |
//!   +--pull--> Pulled --conflict--> Conflicted
//!                |
//!                +--import--> Imported --export--> no changes --> UpToDate
//!                                            |
//!                                            +--commit, push--> Pushed
//!                                                          \--> PushFailed
//! ```
//!
//! Pulling is refused outright while the mirror has uncommitted changes, so
//! local edits are never silently discarded. Conflicts are surfaced, never
//! resolved automatically.
//!
//! # Conflict Resolution
//!
//! A conflicting pull leaves the merge in progress inside the mirror, with
//! conflict markers written into each conflicted file. The live tree is not
//! touched. Once every marker is gone, [`SyncEngine::push`] commits the
//! resolution, imports it into the live tree, and pushes it.
//!
//! # See Also
//!
//! 1. [`copy`]
//! 2. [`sensitive`]
//! 3. [`state`]

pub mod copy;
pub mod sensitive;
pub mod state;

use crate::{
    catalog::PathCatalog,
    config::{PolicyViolation, SyncPolicy},
    crypto::{Cipher, CryptoError},
    exclude::ExclusionMatcher,
    fingerprint::FingerprintError,
    path::{ConfigurationRoot, MirrorRoot},
    sync::{
        copy::{CopyError, TreeFile},
        sensitive::{EncryptedChannel, SensitiveCategory},
        state::SyncState,
    },
    vcs::{AnyMirror, MirrorRepository, VcsError},
};

use chrono::Local;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    fs::read,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Everything one engine invocation needs, built once up front.
pub struct SyncContext {
    pub root: ConfigurationRoot,
    pub mirror: MirrorRoot,
    pub policy: SyncPolicy,
    cipher: Option<Box<dyn Cipher>>,
}

impl SyncContext {
    /// Construct new sync context without encryption.
    pub fn new(root: ConfigurationRoot, mirror: MirrorRoot, policy: SyncPolicy) -> Self {
        Self {
            root,
            mirror,
            policy,
            cipher: None,
        }
    }

    /// Set cipher for sensitive files.
    pub fn with_cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Some(Box::new(cipher));
        self
    }

    /// Cipher for sensitive files, if any.
    pub fn cipher(&self) -> Option<&dyn Cipher> {
        self.cipher.as_deref()
    }
}

impl Debug for SyncContext {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("SyncContext")
            .field("root", &self.root)
            .field("mirror", &self.mirror)
            .field("policy", &self.policy)
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

/// How a push or sync cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Mirror already matched the live tree, nothing was pushed.
    UpToDate,

    /// Changes were committed and pushed.
    Pushed { message: String },

    /// No new commit, but commits left behind by an earlier failed push
    /// were pushed.
    Resumed { ahead: usize },

    /// Remote was overwritten with the existing history, no new commit.
    Overwritten,
}

/// Synchronization engine over a mirror repository.
#[derive(Debug)]
pub struct SyncEngine<'ctx, R = AnyMirror>
where
    R: MirrorRepository,
{
    ctx: &'ctx SyncContext,
    repo: R,
    catalog: PathCatalog,
    exclusions: ExclusionMatcher,
    conflicts: Vec<String>,
}

impl<'ctx, R> SyncEngine<'ctx, R>
where
    R: MirrorRepository,
{
    /// Construct new sync engine.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Policy`] if the sync policy is invalid. Nothing
    ///   has touched the disk at that point.
    pub fn new(ctx: &'ctx SyncContext, repo: R) -> Result<Self> {
        ctx.policy.validate()?;
        Ok(Self {
            ctx,
            repo,
            catalog: PathCatalog::new(&ctx.root),
            exclusions: ExclusionMatcher::new(ctx.policy.sync.exclude.iter().cloned()),
            conflicts: Vec::new(),
        })
    }

    /// Mirror repository the engine drives.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn channel(&self) -> EncryptedChannel<'_> {
        EncryptedChannel::new(
            &self.ctx.root,
            &self.ctx.mirror,
            &self.ctx.policy,
            self.ctx.cipher(),
        )
    }

    /// Copy live tree into the mirror.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotConfigured`] before any file is written if a
    ///   sensitive category is enabled without a cipher.
    /// - Return [`SyncError::Copy`] or [`SyncError::Crypto`] for the first
    ///   file that fails. Earlier files are not rolled back.
    #[instrument(skip(self), level = "debug")]
    pub fn export_to_mirror(&self) -> Result<()> {
        let channel = self.channel();
        channel.ensure_configured()?;

        copy::create_dirs(self.ctx.mirror.as_path())?;
        let copied = copy::export_roots(&self.catalog, &self.exclusions, &self.ctx.mirror)?;
        let encrypted = channel.export()?;
        info!("exported {copied} file(s) and {encrypted} encrypted artifact(s)");

        Ok(())
    }

    /// Copy mirror into the live tree.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotConfigured`] if an artifact of an enabled
    ///   sensitive category is found without a cipher.
    /// - Return [`SyncError::Copy`] or [`SyncError::Crypto`] for the first
    ///   file that fails. Earlier files are not rolled back.
    #[instrument(skip(self), level = "debug")]
    pub fn import_from_mirror(&self) -> Result<()> {
        let channel = self.channel();
        let mut copied = 0;
        let mut decrypted = 0;

        for file in copy::walk_mirror(&self.ctx.mirror, &self.exclusions)? {
            if let Some(category) = SensitiveCategory::from_artifact(&file.mirror_path) {
                if channel.import(category, &file.source)? {
                    decrypted += 1;
                }
                continue;
            }

            if self.import_file(&file)? {
                copied += 1;
            }
        }
        info!("imported {copied} file(s) and {decrypted} encrypted artifact(s)");

        Ok(())
    }

    fn import_file(&self, file: &TreeFile) -> Result<bool> {
        Ok(copy::import_file(&self.catalog, file)?)
    }

    /// Snapshot of mirror and live tree.
    ///
    /// Conflicts reported by the most recent failed pull are joined with the
    /// paths the mirror still marks as conflicted.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if any step of the aggregation fails.
    pub fn get_state(&self) -> Result<SyncState> {
        state::aggregate(
            &self.repo,
            &self.catalog,
            &self.exclusions,
            &self.ctx.mirror,
            &self.conflicts,
        )
    }

    /// Pull from remote, then import the mirror into the live tree.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::LocalChanges`] without touching the network if
    ///   the mirror has uncommitted changes.
    /// - Return [`SyncError::Conflict`] if the merge needs manual
    ///   resolution.
    /// - Return [`SyncError::Auth`] if the remote rejects the credentials.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&mut self) -> Result<()> {
        debug!("sync cycle: start");
        let status = self.repo.status()?;
        if status.merging {
            debug!("sync cycle: merge still in progress");
            self.conflicts = status.conflicted.clone();
            return Err(SyncError::Conflict {
                files: status.conflicted,
            });
        }

        if status.has_changes() {
            debug!("sync cycle: blocked on local changes");
            return Err(SyncError::LocalChanges {
                files: status.changed_paths().map(str::to_owned).collect(),
            });
        }

        match self.repo.pull() {
            Ok(()) => self.conflicts.clear(),
            Err(VcsError::Conflict { files }) => {
                debug!("sync cycle: conflicted");
                self.conflicts = files.clone();
                return Err(SyncError::Conflict { files });
            }
            Err(err) => return Err(err.into()),
        }
        debug!("sync cycle: pulled");

        self.import_from_mirror()?;
        debug!("sync cycle: imported");

        Ok(())
    }

    /// Export the live tree, then commit and push any changes.
    ///
    /// Commits that an earlier failed push left behind are pushed even when
    /// the export changed nothing. If a conflicting merge is in progress, the
    /// export is skipped and the resolved mirror is committed, imported into
    /// the live tree, and pushed instead.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Conflict`] if a conflicted file still carries
    ///   conflict markers.
    /// - Return [`SyncError::Auth`] if the remote rejects the credentials.
    /// - Return [`SyncError`] if export, commit, or push fails.
    #[instrument(skip(self), level = "debug")]
    pub fn push(&mut self) -> Result<SyncOutcome> {
        let status = self.repo.status()?;
        if status.merging {
            return self.conclude_merge(&status.conflicted);
        }

        if let Some(message) = self.snapshot(&sync_message())? {
            self.push_remote()?;
            return Ok(SyncOutcome::Pushed { message });
        }

        // INVARIANT: Commits stranded by a failed push still go out.
        let ahead = self.repo.status()?.ahead;
        if ahead > 0 {
            info!("push {ahead} earlier commit(s)");
            self.push_remote()?;
            return Ok(SyncOutcome::Resumed { ahead });
        }

        debug!("sync cycle: up to date");
        info!("no changes to push");
        Ok(SyncOutcome::UpToDate)
    }

    fn push_remote(&self) -> Result<()> {
        self.repo.push().inspect_err(|err| {
            warn!("sync cycle: push failed: {err}");
        })?;
        debug!("sync cycle: pushed");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn conclude_merge(&mut self, conflicted: &[String]) -> Result<SyncOutcome> {
        let mut unresolved = Vec::new();
        for path in conflicted {
            if has_markers(&self.ctx.mirror.join(path))? {
                unresolved.push(path.clone());
            }
        }

        if !unresolved.is_empty() {
            warn!("{} file(s) still carry conflict markers", unresolved.len());
            self.conflicts = unresolved.clone();
            return Err(SyncError::Conflict { files: unresolved });
        }

        let message = sync_message();
        self.repo.add_all()?;
        self.repo.commit(&message)?;
        info!("commit resolved merge: {message}");
        self.conflicts.clear();

        // INVARIANT: Import before pushing, so a failed push cannot let the
        // next export revert the resolution.
        self.import_from_mirror()?;
        self.push_remote()?;

        Ok(SyncOutcome::Pushed { message })
    }

    /// Run the composite sync cycle: pull, then push.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] from whichever half of the cycle fails. A
    ///   failed pull means push never runs.
    pub fn sync(&mut self) -> Result<SyncOutcome> {
        self.pull()?;
        self.push()
    }

    /// Export the live tree, commit any changes, and overwrite the remote.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if export, commit, or push fails.
    #[instrument(skip(self), level = "debug")]
    pub fn force_push(&self) -> Result<SyncOutcome> {
        let message = self.snapshot(&sync_message())?;
        warn!("overwrite remote history");
        self.repo.force_push()?;

        Ok(match message {
            Some(message) => SyncOutcome::Pushed { message },
            None => SyncOutcome::Overwritten,
        })
    }

    /// Export the live tree, then describe how the mirror differs from its
    /// last commit as a patch.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if export or diffing fails.
    pub fn diff(&self) -> Result<String> {
        self.export_to_mirror()?;
        Ok(self.repo.diff()?)
    }

    /// Export the live tree, then commit if the mirror changed.
    ///
    /// Returns the commit message if a commit was made.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if export, staging, or commit fails.
    pub fn snapshot(&self, message: &str) -> Result<Option<String>> {
        self.export_to_mirror()?;
        if !self.repo.has_changes()? {
            return Ok(None);
        }

        self.repo.add_all()?;
        self.repo.commit(message)?;
        info!("commit: {message}");

        Ok(Some(message.to_owned()))
    }
}

fn has_markers(path: &Path) -> Result<bool> {
    let content = match read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(SyncError::Io {
                source: err,
                path: path.into(),
            })
        }
    };

    Ok(String::from_utf8_lossy(&content)
        .lines()
        .any(|line| line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>")))
}

/// Name of this machine, or "unknown".
pub fn hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into())
}

/// Commit message for an automatic sync.
pub fn sync_message() -> String {
    stamped("Sync")
}

/// Commit message for linking a mirror to a remote.
pub fn link_message() -> String {
    stamped("Link")
}

fn stamped(action: &str) -> String {
    format!(
        "{action} from {} at {}",
        hostname(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Sensitive category needs a cipher, but none is set.
    #[error("{category} is enabled, but encryption is not configured")]
    NotConfigured { category: SensitiveCategory },

    /// Sync policy forbids the operation.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Mirror has uncommitted changes, so pulling would discard them.
    #[error("local changes detected in {} file(s), commit or discard them before pulling", files.len())]
    LocalChanges { files: Vec<String> },

    /// Merge needs manual resolution.
    #[error("merge conflict in {} file(s), resolve manually: {}", files.len(), files.join(", "))]
    Conflict { files: Vec<String> },

    /// Remote rejected credentials.
    #[error("authentication failed for remote {remote}: {message}")]
    Auth { remote: String, message: String },

    /// File cannot be walked or copied.
    #[error(transparent)]
    Copy(#[from] CopyError),

    /// File cannot be fingerprinted.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// Sensitive file cannot be encrypted or decrypted.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// File cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Any other repository failure.
    #[error(transparent)]
    Vcs(VcsError),
}

impl From<VcsError> for SyncError {
    fn from(error: VcsError) -> Self {
        match error {
            VcsError::Conflict { files } => Self::Conflict { files },
            VcsError::Auth { remote, message } => Self::Auth { remote, message },
            error => Self::Vcs(error),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
