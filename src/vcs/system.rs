// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror access through the `git` binary.
//!
//! Every operation is a non-interactive call to `git -C <mirror>`. Terminal
//! prompts are disabled, so a remote asking for credentials fails fast and is
//! reported as [`VcsError::Auth`] instead of hanging.

use crate::vcs::{MirrorAccess, MirrorRepository, RepoStatus, Result, VcsError, ORIGIN};

use indicatif::ProgressBar;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Output},
    time,
};
use tracing::{debug, info, instrument, warn};

const GIT: &str = "git";

/// Lowercase stderr fragments git prints when credentials are refused.
const AUTH_MARKERS: [&str; 6] = [
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid credentials",
];

/// Mirror repository driven through the external `git` binary.
#[derive(Debug, Clone)]
pub struct SystemMirror {
    path: PathBuf,
}

impl SystemMirror {
    fn git<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(GIT);
        cmd.arg("-C").arg(&self.path).args(args);
        syscall(cmd)
    }

    fn git_ok<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.git(args)?;
        if !output.status.success() {
            return Err(failure(&output));
        }

        Ok(chomp(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn has_identity(&self) -> bool {
        self.git(["config", "user.email"])
            .is_ok_and(|output| output.status.success())
    }

    // INVARIANT: Commits never fail for lack of a configured identity.
    fn identity(&self) -> Vec<&'static str> {
        if self.has_identity() {
            return Vec::new();
        }

        debug!("no git identity configured, using fallback");
        vec!["-c", "user.name=oxisync", "-c", "user.email=oxisync@localhost"]
    }

    fn is_merging(&self) -> Result<bool> {
        self.verifies("MERGE_HEAD")
    }

    fn verifies(&self, rev: &str) -> Result<bool> {
        Ok(self.git(["rev-parse", "-q", "--verify", rev])?.status.success())
    }

    fn ahead_behind(&self, branch: &str) -> Result<(usize, usize)> {
        if !self.verifies("HEAD")? {
            return Ok((0, 0));
        }

        // INVARIANT: Every commit is ahead of a branch never pushed.
        let upstream = format!("refs/remotes/{ORIGIN}/{branch}");
        if !self.verifies(&upstream)? {
            let count = self.git_ok(["rev-list", "--count", "HEAD"])?;
            return Ok((count.trim().parse().unwrap_or(0), 0));
        }

        let range = format!("HEAD...{upstream}");
        let counts = self.git_ok(["rev-list", "--left-right", "--count", range.as_str()])?;
        let mut counts = counts.split_whitespace().map(str::parse::<usize>);
        match (counts.next(), counts.next()) {
            (Some(Ok(ahead)), Some(Ok(behind))) => Ok((ahead, behind)),
            _ => Ok((0, 0)),
        }
    }

    fn untracked_patch(&self, path: &str) -> Result<String> {
        let output = self.git(["diff", "--no-color", "--no-index", "--", "/dev/null", path])?;
        // INVARIANT: `--no-index` exits with 1 when the files differ.
        match output.status.code() {
            Some(0 | 1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(failure(&output)),
        }
    }

    fn unmerged_paths(&self) -> Result<Vec<String>> {
        let output = self.git(["diff", "--name-only", "--diff-filter=U"])?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn network<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.git(args)?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_auth_failure(&stderr) {
            return Err(VcsError::Auth {
                remote: ORIGIN.into(),
                message: chomp(stderr.into_owned()),
            });
        }

        if stderr.contains("[rejected]") || stderr.contains("failed to push") {
            return Err(VcsError::Rejected {
                remote: ORIGIN.into(),
                message: chomp(stderr.into_owned()),
            });
        }

        Err(failure(&output))
    }
}

impl MirrorAccess for SystemMirror {
    #[instrument(skip(path, branch), level = "debug")]
    fn try_init(path: impl AsRef<Path>, branch: impl AsRef<str>) -> Result<Self> {
        info!("initialize new mirror: {:?}", path.as_ref().display());
        std::fs::create_dir_all(path.as_ref())?;
        let mirror = Self {
            path: path.as_ref().into(),
        };
        mirror.git_ok(["init", "-b", branch.as_ref()])?;
        Ok(mirror)
    }

    #[instrument(skip(path), level = "debug")]
    fn try_open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open mirror: {:?}", path.as_ref().display());
        let mirror = Self {
            path: path.as_ref().into(),
        };
        mirror.git_ok(["rev-parse", "--git-dir"])?;
        Ok(mirror)
    }

    fn try_clone(
        url: impl AsRef<str>,
        path: impl AsRef<Path>,
        branch: impl AsRef<str>,
        bar: ProgressBar,
    ) -> Result<Self> {
        bar.set_message(url.as_ref().to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let mut cmd = Command::new(GIT);
        cmd.arg("clone").arg(url.as_ref()).arg(path.as_ref());
        let output = syscall(cmd)?;
        bar.finish_and_clear();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_auth_failure(&stderr) {
                return Err(VcsError::Auth {
                    remote: ORIGIN.into(),
                    message: chomp(stderr.into_owned()),
                });
            }
            return Err(failure(&output));
        }

        let mirror = Self {
            path: path.as_ref().into(),
        };

        // INVARIANT: Empty remotes leave HEAD unborn, so point it at the
        // configured branch for the first push.
        if mirror.git(["rev-parse", "-q", "--verify", "HEAD"])?.status.success() {
            return Ok(mirror);
        }
        warn!("remote {:?} is empty", url.as_ref());
        let head = format!("refs/heads/{}", branch.as_ref());
        mirror.git_ok(["symbolic-ref", "HEAD", head.as_str()])?;

        Ok(mirror)
    }
}

impl MirrorRepository for SystemMirror {
    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.git_ok(["remote", "add", name, url])?;
        Ok(())
    }

    fn remote_url(&self, name: &str) -> Result<String> {
        self.git_ok(["remote", "get-url", name])
            .map_err(|_| VcsError::MissingRemote(name.into()))
    }

    fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.remote_url(name)?;
        self.git_ok(["remote", "set-url", name, url])?;
        Ok(())
    }

    fn status(&self) -> Result<RepoStatus> {
        let output = self.git(["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        if !output.status.success() {
            return Err(failure(&output));
        }

        let mut status = parse_porcelain(&output.stdout);
        status.branch = self.branch().ok();
        status.merging = self.is_merging()?;
        if let Some(branch) = &status.branch {
            (status.ahead, status.behind) = self.ahead_behind(branch)?;
        }

        Ok(status)
    }

    fn add_all(&self) -> Result<()> {
        self.git_ok(["add", "--all"])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn commit(&self, message: &str) -> Result<()> {
        let mut args: Vec<&str> = self.identity();
        args.extend(["commit", "--quiet", "-m", message]);
        self.git_ok(args)?;
        Ok(())
    }

    fn diff(&self) -> Result<String> {
        let mut patch = String::new();
        if self.verifies("HEAD")? {
            let output = self.git(["diff", "--no-color", "HEAD"])?;
            if !output.status.success() {
                return Err(failure(&output));
            }
            patch.push_str(&String::from_utf8_lossy(&output.stdout));
        }

        for path in self.status()?.untracked {
            patch.push_str(&self.untracked_patch(&path)?);
        }

        Ok(patch)
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self) -> Result<()> {
        let branch = self.branch()?;
        self.network(["push", ORIGIN, branch.as_str()])
    }

    #[instrument(skip(self), level = "debug")]
    fn force_push(&self) -> Result<()> {
        let branch = self.branch()?;
        self.network(["push", "--force", ORIGIN, branch.as_str()])
    }

    #[instrument(skip(self), level = "debug")]
    fn pull(&self) -> Result<()> {
        let branch = self.branch()?;
        let mut args: Vec<&str> = self.identity();
        args.extend(["pull", "--no-rebase", "--no-edit", ORIGIN, branch.as_str()]);
        let output = self.git(args)?;
        if output.status.success() {
            return Ok(());
        }

        let files = self.unmerged_paths()?;
        if !files.is_empty() {
            warn!("merge with {ORIGIN}/{branch} conflicts in {} file(s)", files.len());
            return Err(VcsError::Conflict { files });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_auth_failure(&stderr) {
            return Err(VcsError::Auth {
                remote: ORIGIN.into(),
                message: chomp(stderr.into_owned()),
            });
        }

        // INVARIANT: A missing upstream branch means nothing to pull yet.
        if stderr.contains("couldn't find remote ref") {
            warn!("{ORIGIN} has no branch {branch:?} yet, nothing to pull");
            return Ok(());
        }

        Err(failure(&output))
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch(&self) -> Result<()> {
        self.network(["fetch", ORIGIN])
    }

    fn branch(&self) -> Result<String> {
        let output = self.git(["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            return Err(VcsError::DetachedHead);
        }

        Ok(chomp(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

/// Parse output of `git status --porcelain=v1 -z`.
///
/// Branch, merge state, and upstream counts are left at their defaults.
pub(crate) fn parse_porcelain(raw: &[u8]) -> RepoStatus {
    let mut status = RepoStatus::default();
    let mut fields = raw.split(|byte| *byte == 0);

    while let Some(field) = fields.next() {
        if field.len() < 4 {
            continue;
        }

        let (x, y) = (field[0], field[1]);
        let path = String::from_utf8_lossy(&field[3..]).into_owned();

        // INVARIANT: Renames and copies carry their source path as an extra field.
        if matches!(x, b'R' | b'C') {
            fields.next();
        }

        match (x, y) {
            (b'?', b'?') => status.untracked.push(path),
            (b'U', _) | (_, b'U') | (b'A', b'A') | (b'D', b'D') => status.conflicted.push(path),
            (_, y) if y != b' ' => status.modified.push(path),
            (x, _) if x != b' ' => status.staged.push(path),
            _ => {}
        }
    }

    status
}

fn is_auth_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    AUTH_MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn syscall(mut cmd: Command) -> Result<Output> {
    debug!("run {cmd:?}");
    Ok(cmd.env("GIT_TERMINAL_PROMPT", "0").output()?)
}

fn failure(output: &Output) -> VcsError {
    let stdout = String::from_utf8_lossy(output.stdout.as_slice());
    let stderr = String::from_utf8_lossy(output.stderr.as_slice());
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    VcsError::Syscall(std::io::Error::other(format!(
        "git failed:\n{}",
        chomp(message)
    )))
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn parse_porcelain_classifies_entries() {
        let raw = b"?? agent/new.md\0 M opencode.json\0A  themes/dark.json\0\
                    UU command/merge.md\0AA both.json\0R  renamed.md\0original.md\0\
                    MM staged-and-modified.json\0";
        let status = parse_porcelain(raw);
        assert_eq!(status.untracked, vec!["agent/new.md".to_string()]);
        assert_eq!(
            status.modified,
            vec![
                "opencode.json".to_string(),
                "staged-and-modified.json".to_string()
            ]
        );
        assert_eq!(
            status.staged,
            vec!["themes/dark.json".to_string(), "renamed.md".to_string()]
        );
        assert_eq!(
            status.conflicted,
            vec!["command/merge.md".to_string(), "both.json".to_string()]
        );
    }

    #[test]
    fn parse_porcelain_empty_output() {
        assert_eq!(parse_porcelain(b""), RepoStatus::default());
    }

    #[test_case("fatal: Authentication failed for 'https://blah.org/config.git/'", true; "https")]
    #[test_case("git@blah.org: Permission denied (publickey).", true; "ssh")]
    #[test_case("fatal: could not read Username for 'https://blah.org': terminal prompts disabled", true; "prompt")]
    #[test_case("fatal: repository 'https://blah.org/missing.git/' not found", false; "missing")]
    #[test_case("", false; "empty")]
    #[test]
    fn detect_auth_failure(stderr: &str, expect: bool) {
        use pretty_assertions::assert_eq;
        assert_eq!(is_auth_failure(stderr), expect);
    }

    #[test]
    fn chomp_trailing_newline() {
        assert_eq!(chomp("main\n".into()), "main");
        assert_eq!(chomp("main\r\n".into()), "main");
        assert_eq!(chomp("main".into()), "main");
    }
}
