// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror access through libgit2.
//!
//! Network operations authenticate through [`auth_git2`], which tries SSH
//! agents, key files, and credential helpers before falling back to prompting
//! the user. Prompts suspend whatever progress bar is currently drawn.

use crate::vcs::{MirrorAccess, MirrorRepository, RepoStatus, Result, VcsError, ORIGIN};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AnnotatedCommit, Config, DiffFormat, DiffOptions, ErrorClass, ErrorCode, FetchOptions, Index,
    IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions,
    RepositoryState, Signature, Status, StatusOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time};
use tracing::{debug, info, instrument, warn};

/// Mirror repository driven through libgit2.
pub struct LibGitMirror {
    repository: Repository,
    bar: ProgressBar,
}

impl std::fmt::Debug for LibGitMirror {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("LibGitMirror")
            .field("path", &self.repository.path())
            .finish()
    }
}

impl LibGitMirror {
    /// Construct new mirror handle around an opened repository.
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            bar: ProgressBar::hidden(),
        }
    }

    /// Use progress bar for credential prompts during network operations.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    fn origin(&self) -> Result<git2::Remote<'_>> {
        self.repository
            .find_remote(ORIGIN)
            .map_err(|_| VcsError::MissingRemote(ORIGIN.into()))
    }

    fn authenticator(&self) -> GitAuthenticator {
        GitAuthenticator::default().set_prompter(IndicatifPrompter::new(self.bar.clone()))
    }

    fn callbacks<'a>(
        &self,
        config: &'a Config,
        authenticator: &'a GitAuthenticator,
    ) -> RemoteCallbacks<'a> {
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(config));
        rc
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repository.signature() {
            Ok(signature) => Ok(signature),
            Err(err) => {
                debug!("no git identity configured, using fallback: {err}");
                Ok(Signature::now("oxisync", "oxisync@localhost")?)
            }
        }
    }

    fn reference_oid(&self, name: &str) -> Result<Option<Oid>> {
        match self.repository.refname_to_id(name) {
            Ok(oid) => Ok(Some(oid)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn ahead_behind(&self, branch: &str) -> Result<(usize, usize)> {
        let local = self.reference_oid(&format!("refs/heads/{branch}"))?;
        let upstream = self.reference_oid(&format!("refs/remotes/{ORIGIN}/{branch}"))?;
        match (local, upstream) {
            (Some(local), Some(upstream)) => {
                Ok(self.repository.graph_ahead_behind(local, upstream)?)
            }
            (Some(local), None) => {
                let mut walk = self.repository.revwalk()?;
                walk.push(local)?;
                Ok((walk.count(), 0))
            }
            (None, _) => Ok((0, 0)),
        }
    }

    fn checkout_head(&self) -> Result<()> {
        self.repository
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    #[instrument(skip(self, incoming), level = "debug")]
    fn merge(&self, branch: &str, incoming: &AnnotatedCommit<'_>) -> Result<()> {
        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        self.repository
            .merge(&[incoming], None, Some(&mut checkout))?;

        // INVARIANT: A conflicting merge stays in progress with markers in the
        // working tree until the user resolves it and commits.
        let index = self.repository.index()?;
        if index.has_conflicts() {
            let files = conflicted_paths(&index)?;
            warn!("merge with {ORIGIN}/{branch} conflicts in {} file(s)", files.len());
            return Err(VcsError::Conflict { files });
        }

        self.commit(&format!("Merge remote-tracking branch '{ORIGIN}/{branch}'"))
    }

    fn push_refspec(&self, force: bool) -> Result<()> {
        let branch = self.branch()?;
        let prefix = if force { "+" } else { "" };
        let refspec = format!("{prefix}refs/heads/{branch}:refs/heads/{branch}");
        let mut remote = self.origin()?;
        let config = self.repository.config()?;
        let authenticator = self.authenticator();

        let mut rejection = None;
        {
            let mut rc = self.callbacks(&config, &authenticator);
            rc.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    rejection = Some(format!("{refname}: {status}"));
                }
                Ok(())
            });
            let mut po = PushOptions::new();
            po.remote_callbacks(rc);
            remote
                .push(&[refspec.as_str()], Some(&mut po))
                .map_err(|err| classify(ORIGIN, err))?;
        }

        if let Some(message) = rejection {
            return Err(VcsError::Rejected {
                remote: ORIGIN.into(),
                message,
            });
        }

        // INVARIANT: Tracking branch mirrors what the remote now holds.
        if let Some(local) = self.reference_oid(&format!("refs/heads/{branch}"))? {
            self.repository.reference(
                &format!("refs/remotes/{ORIGIN}/{branch}"),
                local,
                true,
                "oxisync: push",
            )?;
        }

        Ok(())
    }
}

impl MirrorAccess for LibGitMirror {
    /// Initialize a new mirror repository.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(path, branch), level = "debug")]
    fn try_init(path: impl AsRef<Path>, branch: impl AsRef<str>) -> Result<Self> {
        info!("initialize new mirror: {:?}", path.as_ref().display());
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch.as_ref());
        opts.mkpath(true);
        Ok(Self::new(Repository::init_opts(path.as_ref(), &opts)?))
    }

    /// Open existing mirror repository.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(path), level = "debug")]
    fn try_open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open mirror: {:?}", path.as_ref().display());
        Ok(Self::new(Repository::open(path.as_ref())?))
    }

    /// Clone mirror repository from remote.
    ///
    /// The progress of the clone is displayed through a progress bar. If any
    /// credentials are required for the clone to continue, then the user will
    /// be prompted for them, blocking the progress bar for user input.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    /// - Return [`VcsError::Auth`] if remote rejects credentials.
    fn try_clone(
        url: impl AsRef<str>,
        path: impl AsRef<Path>,
        branch: impl AsRef<str>,
        bar: ProgressBar,
    ) -> Result<Self> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.as_ref().to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(stats.total_objects() as u64);
                prompter.bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let repository = RepoBuilder::new()
            .fetch_options(fo)
            .clone(url.as_ref(), path.as_ref())
            .map_err(|err| classify(ORIGIN, err))?;
        bar.finish_and_clear();

        // INVARIANT: Empty remotes leave HEAD unborn, so point it at the
        // configured branch for the first push.
        if let Err(err) = repository.head() {
            if err.code() == ErrorCode::UnbornBranch {
                warn!("remote {:?} is empty", url.as_ref());
                repository.set_head(&format!("refs/heads/{}", branch.as_ref()))?;
            }
        }

        Ok(Self::new(repository).with_progress(bar))
    }
}

impl MirrorRepository for LibGitMirror {
    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.repository.remote(name, url)?;
        Ok(())
    }

    fn remote_url(&self, name: &str) -> Result<String> {
        self.repository
            .find_remote(name)
            .ok()
            .and_then(|remote| remote.url().map(str::to_owned))
            .ok_or_else(|| VcsError::MissingRemote(name.into()))
    }

    fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.repository
            .find_remote(name)
            .map_err(|_| VcsError::MissingRemote(name.into()))?;
        self.repository.remote_set_url(name, url)?;
        Ok(())
    }

    fn status(&self) -> Result<RepoStatus> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let mut status = RepoStatus::default();
        for entry in self.repository.statuses(Some(&mut opts))?.iter() {
            let path = String::from_utf8_lossy(entry.path_bytes()).into_owned();
            let flags = entry.status();
            if flags.is_conflicted() {
                status.conflicted.push(path);
            } else if flags.is_wt_new() {
                status.untracked.push(path);
            } else if flags.intersects(
                Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_RENAMED | Status::WT_TYPECHANGE,
            ) {
                status.modified.push(path);
            } else if flags.intersects(
                Status::INDEX_NEW
                    | Status::INDEX_MODIFIED
                    | Status::INDEX_DELETED
                    | Status::INDEX_RENAMED
                    | Status::INDEX_TYPECHANGE,
            ) {
                status.staged.push(path);
            }
        }

        status.branch = self.branch().ok();
        status.merging = self.repository.state() != RepositoryState::Clean;
        if let Some(branch) = &status.branch {
            (status.ahead, status.behind) = self.ahead_behind(branch)?;
        }

        Ok(status)
    }

    fn add_all(&self) -> Result<()> {
        let mut index = self.repository.index()?;

        // INVARIANT: Staging a conflicted path resolves it.
        if let Some(workdir) = self.repository.workdir() {
            for path in conflicted_paths(&index)? {
                if workdir.join(&path).exists() {
                    index.add_path(Path::new(&path))?;
                } else {
                    index.remove_path(Path::new(&path))?;
                }
            }
        }

        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // INVARIANT: Stage deletions too.
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn commit(&self, message: &str) -> Result<()> {
        let mut index = self.repository.index()?;
        let tree = self.repository.find_tree(index.write_tree()?)?;
        let signature = self.signature()?;

        // INVARIANT: First commit on an unborn branch has no parents.
        let parent = match self.repository.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(err) => return Err(err.into()),
        };
        let mut parents = parent.into_iter().collect::<Vec<_>>();

        let merging = self.repository.state() == RepositoryState::Merge;
        if merging {
            if let Some(incoming) = self.reference_oid("MERGE_HEAD")? {
                parents.push(self.repository.find_commit(incoming)?);
            }
        }
        let parents = parents.iter().collect::<Vec<_>>();

        self.repository
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        if merging {
            self.repository.cleanup_state()?;
        }

        Ok(())
    }

    fn diff(&self) -> Result<String> {
        let head = match self.repository.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(err) => return Err(err.into()),
        };

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
        let diff = self
            .repository
            .diff_tree_to_workdir_with_index(head.as_ref(), Some(&mut opts))?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_, _, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        Ok(patch)
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self) -> Result<()> {
        self.push_refspec(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn force_push(&self) -> Result<()> {
        self.push_refspec(true)
    }

    #[instrument(skip(self), level = "debug")]
    fn pull(&self) -> Result<()> {
        let branch = self.branch()?;
        self.fetch()?;

        let upstream = match self
            .repository
            .find_reference(&format!("refs/remotes/{ORIGIN}/{branch}"))
        {
            Ok(upstream) => upstream,
            Err(err) if err.code() == ErrorCode::NotFound => {
                warn!("{ORIGIN} has no branch {branch:?} yet, nothing to pull");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let incoming = self.repository.reference_to_annotated_commit(&upstream)?;
        let (analysis, _) = self.repository.merge_analysis(&[&incoming])?;
        let local = format!("refs/heads/{branch}");

        if analysis.is_up_to_date() {
            debug!("{branch} is up to date with {ORIGIN}");
            Ok(())
        } else if analysis.is_unborn() {
            info!("check out {ORIGIN}/{branch}");
            self.repository
                .reference(&local, incoming.id(), true, "oxisync: initial pull")?;
            self.repository.set_head(&local)?;
            self.checkout_head()
        } else if analysis.is_fast_forward() {
            info!("fast-forward {branch} to {ORIGIN}/{branch}");
            self.repository
                .find_reference(&local)?
                .set_target(incoming.id(), "oxisync: fast-forward")?;
            self.repository.set_head(&local)?;
            self.checkout_head()
        } else {
            info!("merge {ORIGIN}/{branch} into {branch}");
            self.merge(&branch, &incoming)
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch(&self) -> Result<()> {
        let mut remote = self.origin()?;
        let config = self.repository.config()?;
        let authenticator = self.authenticator();
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks(&config, &authenticator));
        remote
            .fetch::<&str>(&[], Some(&mut fo), None)
            .map_err(|err| classify(ORIGIN, err))
    }

    fn branch(&self) -> Result<String> {
        let head = self.repository.find_reference("HEAD")?;
        head.symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_owned)
            .ok_or(VcsError::DetachedHead)
    }
}

fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
            files.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    files.sort();
    files.dedup();

    Ok(files)
}

/// Separate authentication failures from every other libgit2 error.
fn classify(remote: &str, err: git2::Error) -> VcsError {
    let is_auth = err.code() == ErrorCode::Auth
        || (matches!(err.class(), ErrorClass::Http | ErrorClass::Ssh)
            && err.message().to_lowercase().contains("auth"));

    if is_auth {
        VcsError::Auth {
            remote: remote.into(),
            message: err.message().into(),
        }
    } else {
        err.into()
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}
