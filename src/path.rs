// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for the live configuration tree that
//! needs to be mirrored, and for the files Oxisync keeps for itself. Nothing
//! in here checks whether the paths it hands out actually exist. The sync
//! engine treats every path supplied by this module as plain data.
//!
//! # Live Tree Layout
//!
//! OpenCode keeps its configuration in `$XDG_CONFIG_HOME/opencode`, and its
//! credentials in `$XDG_DATA_HOME/opencode`. Some directories used by OpenCode
//! live outside of both, e.g., the skills directory `~/.claude/skills` that is
//! shared with other tools. Those are modeled as [`ExternalRoot`]s that carry
//! an explicit name to use inside of the mirror.

use std::{
    env,
    path::{Path, PathBuf},
};

/// Name of the shared skills directory inside of the mirror.
pub const CLAUDE_SKILLS_MIRROR_NAME: &str = "claude-skills";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine base configuration directory.
///
/// Follows `$XDG_CONFIG_HOME` on every Unix-like system, falling back to
/// `~/.config` when unset, because that is where OpenCode itself looks.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn config_home() -> Result<PathBuf> {
    xdg_or("XDG_CONFIG_HOME", [".config"], dirs::config_dir)
}

/// Determine base data directory.
///
/// Follows `$XDG_DATA_HOME` on every Unix-like system, falling back to
/// `~/.local/share` when unset.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn data_home() -> Result<PathBuf> {
    xdg_or("XDG_DATA_HOME", [".local", "share"], dirs::data_dir)
}

#[cfg(unix)]
fn xdg_or<const N: usize>(
    var: &str,
    fallback: [&str; N],
    _native: fn() -> Option<PathBuf>,
) -> Result<PathBuf> {
    match env::var_os(var).filter(|value| !value.is_empty()) {
        Some(value) => Ok(PathBuf::from(value)),
        None => Ok(fallback.iter().fold(home_dir()?, |path, part| path.join(part))),
    }
}

#[cfg(not(unix))]
fn xdg_or<const N: usize>(
    var: &str,
    _fallback: [&str; N],
    native: fn() -> Option<PathBuf>,
) -> Result<PathBuf> {
    match env::var_os(var).filter(|value| !value.is_empty()) {
        Some(value) => Ok(PathBuf::from(value)),
        None => native().ok_or(NoWayHome),
    }
}

/// Live configuration tree of the application being mirrored.
///
/// Immutable for the duration of one sync operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationRoot {
    /// Directory holding the application's configuration.
    pub config_dir: PathBuf,

    /// Directory holding the application's data, e.g., credentials.
    pub data_dir: PathBuf,

    /// Directories outside of the configuration directory that still get
    /// mirrored.
    pub external_roots: Vec<ExternalRoot>,
}

impl ConfigurationRoot {
    /// Construct new configuration root without any external roots.
    pub fn new(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
            external_roots: Vec::new(),
        }
    }

    /// Attach an external root to mirror under a given name.
    pub fn with_external_root(mut self, root: ExternalRoot) -> Self {
        self.external_roots.push(root);
        self
    }

    /// Resolve OpenCode's live tree for the current user.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn try_default() -> Result<Self> {
        Ok(Self::new(
            config_home()?.join("opencode"),
            data_home()?.join("opencode"),
        )
        .with_external_root(ExternalRoot::new(
            home_dir()?.join(".claude").join("skills"),
            CLAUDE_SKILLS_MIRROR_NAME,
        )))
    }

    /// Path to primary credentials file.
    pub fn auth_file(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }

    /// Path to secondary credentials file for MCP servers.
    pub fn mcp_auth_file(&self) -> PathBuf {
        self.data_dir.join("mcp-auth.json")
    }
}

/// Directory mirrored from outside of the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRoot {
    /// Real location in the live tree.
    pub path: PathBuf,

    /// Relative name used for it inside of the mirror.
    pub mirror_name: PathBuf,
}

impl ExternalRoot {
    /// Construct new external root.
    pub fn new(path: impl Into<PathBuf>, mirror_name: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror_name: mirror_name.into(),
        }
    }
}

/// Version-controlled working copy that acts as the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRoot(PathBuf);

impl MirrorRoot {
    /// Construct new mirror root.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat mirror root as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Join relative path onto mirror root.
    pub fn join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.0.join(path)
    }
}

/// Directories Oxisync uses for its own state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirs {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl ToolDirs {
    /// Resolve default tool directories for the current user.
    ///
    /// Uses `$XDG_CONFIG_HOME/oxisync` and `$XDG_DATA_HOME/oxisync`.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn try_default() -> Result<Self> {
        Ok(Self {
            config_dir: config_home()?.join("oxisync"),
            data_dir: data_home()?.join("oxisync"),
        })
    }

    /// Path to the sync policy document.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default path to the encryption key.
    pub fn key_file(&self) -> PathBuf {
        self.config_dir.join("sync.key")
    }

    /// Location of the mirror working copy.
    pub fn mirror_root(&self) -> MirrorRoot {
        MirrorRoot::new(self.data_dir.join("repo"))
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
