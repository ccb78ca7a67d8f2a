// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the sync policy document to simplify the process of
//! serialization and deserialization. The sync engine only ever consumes a
//! snapshot of the policy, it never writes to it.
//!
//! # General Layout
//!
//! The sync policy is composed of three sections: repository settings,
//! encryption settings, and sync settings. The repository section identifies
//! the remote that the mirror pushes to and pulls from. The encryption section
//! says whether an encryption key is in play, and where it lives. The sync
//! section decides which sensitive categories travel through the mirror, and
//! which paths never do.
//!
//! ```toml
//! [repo]
//! url = "git@example.com:me/opencode-config.git"
//! branch = "main"
//!
//! [encryption]
//! enabled = true
//! key_file = "~/.config/oxisync/sync.key"
//!
//! [sync]
//! include_auth = true
//! include_mcp_auth = false
//! exclude = ["node_modules", "*.log", "bun.lock"]
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{create_dir_all, read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Sync policy document.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncPolicy {
    /// Remote repository to mirror through.
    #[serde(default)]
    pub repo: RepoSettings,

    /// Encryption settings for sensitive categories.
    #[serde(default)]
    pub encryption: EncryptionSettings,

    /// What gets mirrored.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncPolicy {
    /// Load sync policy from target path.
    ///
    /// A missing policy file is not an error, it just means that Oxisync has
    /// not been set up yet.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if policy file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if policy file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => Ok(Some(data.parse()?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.into(),
            }),
        }
    }

    /// Save sync policy to target path.
    ///
    /// Creates any missing parent directories.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if policy file cannot be written.
    /// - Return [`ConfigError::Serialize`] if policy cannot be serialized.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = toml::ser::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|err| ConfigError::Write {
                source: err,
                path: parent.into(),
            })?;
        }

        write(path, data).map_err(|err| ConfigError::Write {
            source: err,
            path: path.into(),
        })
    }

    /// Validate sync policy.
    ///
    /// Meant to be called before any file operation begins.
    ///
    /// # Errors
    ///
    /// - Return [`PolicyViolation::MissingUrl`] if no remote URL is set.
    /// - Return [`PolicyViolation::UnencryptedCategory`] if a sensitive
    ///   category is enabled while encryption is disabled.
    pub fn validate(&self) -> Result<(), PolicyViolation> {
        if self.repo.url.trim().is_empty() {
            return Err(PolicyViolation::MissingUrl);
        }

        if !self.encryption.enabled {
            if self.sync.include_auth {
                return Err(PolicyViolation::UnencryptedCategory("sync.include_auth"));
            }

            if self.sync.include_mcp_auth {
                return Err(PolicyViolation::UnencryptedCategory(
                    "sync.include_mcp_auth",
                ));
            }
        }

        Ok(())
    }

    /// Set one field of the policy by its dotted key.
    ///
    /// Booleans accept `true`, `yes`, `1` and `false`, `no`, `0`. The key file
    /// is shell expanded. Exclusion patterns are a comma separated list.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownKey`] if no field goes by that key.
    /// - Return [`ConfigError::InvalidValue`] if the value does not fit.
    /// - Return [`ConfigError::ShellExpansion`] if the key file cannot be
    ///   expanded.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "repo.url" => self.repo.url = value.into(),
            "repo.branch" if value.is_empty() => return Err(invalid(key, value)),
            "repo.branch" => self.repo.branch = value.into(),
            "encryption.enabled" => self.encryption.enabled = flag(key, value)?,
            "encryption.key_file" if value.is_empty() => self.encryption.key_file = None,
            "encryption.key_file" => {
                let expanded = shellexpand::full(value)?.into_owned();
                self.encryption.key_file = Some(PathBuf::from(expanded));
            }
            "sync.include_auth" => self.sync.include_auth = flag(key, value)?,
            "sync.include_mcp_auth" => self.sync.include_mcp_auth = flag(key, value)?,
            "sync.exclude" => {
                self.sync.exclude = value
                    .split(',')
                    .map(str::trim)
                    .filter(|pattern| !pattern.is_empty())
                    .map(str::to_owned)
                    .collect();
            }
            _ => return Err(ConfigError::UnknownKey { key: key.into() }),
        }

        Ok(())
    }
}

fn flag(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

impl FromStr for SyncPolicy {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut policy: SyncPolicy = toml::de::from_str(data)?;

        // INVARIANT: Perform shell expansion on key file field.
        if let Some(key_file) = policy.encryption.key_file.take() {
            let expanded = shellexpand::full(key_file.to_string_lossy().as_ref())?.into_owned();
            policy.encryption.key_file = Some(PathBuf::from(expanded));
        }

        Ok(policy)
    }
}

impl Display for SyncPolicy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Remote repository settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RepoSettings {
    /// Remote URL to clone from and push to.
    #[serde(default)]
    pub url: String,

    /// Branch the mirror tracks.
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".into()
}

/// Encryption settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct EncryptionSettings {
    /// Whether sensitive categories may be encrypted into the mirror.
    #[serde(default)]
    pub enabled: bool,

    /// Path to the encryption key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

/// Sync behavior settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Mirror primary credentials (`auth.json`) in encrypted form.
    #[serde(default)]
    pub include_auth: bool,

    /// Mirror secondary credentials (`mcp-auth.json`) in encrypted form.
    #[serde(default)]
    pub include_mcp_auth: bool,

    /// Exclusion patterns.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            include_auth: false,
            include_mcp_auth: false,
            exclude: vec!["node_modules".into(), "*.log".into(), "bun.lock".into()],
        }
    }
}

/// Sync policy forbids the requested operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// No remote URL to mirror through.
    #[error("repo.url is required")]
    MissingUrl,

    /// Sensitive category enabled without encryption.
    #[error("{0} requires encryption.enabled to be true")]
    UnencryptedCategory(&'static str),
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// No policy field goes by this key.
    #[error("unknown configuration key {key:?}")]
    UnknownKey { key: String },

    /// Value does not fit the policy field.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    /// Policy file cannot be read.
    #[error("failed to read sync policy at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Policy file cannot be written.
    #[error("failed to write sync policy at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
