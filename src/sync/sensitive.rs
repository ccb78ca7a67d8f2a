// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Encrypted channel for sensitive files.
//!
//! Exactly two files in the live tree carry credentials. They are never
//! copied into the mirror as plaintext. Instead, each one is encrypted into a
//! fixed-name artifact at the mirror root on export, and decrypted back into
//! place on import.
//!
//! Each category has its own switch in the sync policy. An enabled category
//! without a configured cipher is a hard failure in both directions. An
//! artifact whose category is disabled is skipped on import: it is neither
//! decrypted nor copied into the live tree as an opaque blob.

use crate::{
    config::SyncPolicy,
    crypto::Cipher,
    path::{ConfigurationRoot, MirrorRoot},
    sync::{copy::create_dirs, Result, SyncError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{metadata, read},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Class of credential-bearing file eligible only for encrypted sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensitiveCategory {
    /// Provider credentials, i.e., `auth.json`.
    PrimaryCredentials,

    /// MCP server credentials, i.e., `mcp-auth.json`.
    SecondaryCredentials,
}

impl SensitiveCategory {
    /// Every sensitive category.
    pub const ALL: [Self; 2] = [Self::PrimaryCredentials, Self::SecondaryCredentials];

    /// Name of the encrypted artifact at the mirror root.
    pub fn artifact_name(self) -> &'static str {
        match self {
            Self::PrimaryCredentials => "auth.json.enc",
            Self::SecondaryCredentials => "mcp-auth.json.enc",
        }
    }

    /// Policy key that enables the category.
    pub fn policy_key(self) -> &'static str {
        match self {
            Self::PrimaryCredentials => "sync.include_auth",
            Self::SecondaryCredentials => "sync.include_mcp_auth",
        }
    }

    /// Plaintext location in the live tree.
    pub fn source(self, root: &ConfigurationRoot) -> PathBuf {
        match self {
            Self::PrimaryCredentials => root.auth_file(),
            Self::SecondaryCredentials => root.mcp_auth_file(),
        }
    }

    /// Check if sync policy enables the category.
    pub fn is_enabled(self, policy: &SyncPolicy) -> bool {
        match self {
            Self::PrimaryCredentials => policy.sync.include_auth,
            Self::SecondaryCredentials => policy.sync.include_mcp_auth,
        }
    }

    /// Identify category from a path relative to the mirror root.
    pub fn from_artifact(mirror_path: &Path) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| mirror_path == Path::new(category.artifact_name()))
    }
}

impl Display for SensitiveCategory {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::PrimaryCredentials => fmt.write_str("primary credentials (auth.json)"),
            Self::SecondaryCredentials => {
                fmt.write_str("secondary credentials (mcp-auth.json)")
            }
        }
    }
}

/// Route sensitive files through a cipher.
pub struct EncryptedChannel<'a> {
    root: &'a ConfigurationRoot,
    mirror: &'a MirrorRoot,
    policy: &'a SyncPolicy,
    cipher: Option<&'a dyn Cipher>,
}

impl<'a> EncryptedChannel<'a> {
    /// Construct new encrypted channel.
    pub fn new(
        root: &'a ConfigurationRoot,
        mirror: &'a MirrorRoot,
        policy: &'a SyncPolicy,
        cipher: Option<&'a dyn Cipher>,
    ) -> Self {
        Self {
            root,
            mirror,
            policy,
            cipher,
        }
    }

    /// Categories enabled by the sync policy.
    pub fn enabled(&self) -> impl Iterator<Item = SensitiveCategory> + '_ {
        SensitiveCategory::ALL
            .into_iter()
            .filter(|category| category.is_enabled(self.policy))
    }

    /// Make sure every enabled category has a cipher.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotConfigured`] for the first enabled category
    ///   when no cipher is set.
    pub fn ensure_configured(&self) -> Result<()> {
        match (self.enabled().next(), self.cipher) {
            (Some(category), None) => Err(SyncError::NotConfigured { category }),
            _ => Ok(()),
        }
    }

    /// Encrypt every enabled category into the mirror.
    ///
    /// Categories whose plaintext does not exist yet are skipped. Returns the
    /// number of artifacts written.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotConfigured`] before writing anything if an
    ///   enabled category has no cipher.
    /// - Return [`SyncError::Crypto`] if encryption or writing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn export(&self) -> Result<usize> {
        self.ensure_configured()?;
        let Some(cipher) = self.cipher else {
            return Ok(0);
        };

        let mut count = 0;
        for category in self.enabled() {
            let source = category.source(self.root);
            match metadata(&source) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("no {category} to protect yet");
                    continue;
                }
                Err(err) => return Err(SyncError::Io { source: err, path: source }),
            }

            let artifact = self.mirror.join(category.artifact_name());
            if is_current(cipher, &source, &artifact)? {
                debug!("artifact of {category} is current");
                continue;
            }

            info!("encrypt {category} into {:?}", artifact.display());
            cipher.encrypt_file(&source, &artifact)?;
            count += 1;
        }

        Ok(count)
    }

    /// Decrypt an artifact found in the mirror back into the live tree.
    ///
    /// Returns `false` if the category is disabled, in which case the artifact
    /// is left alone.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotConfigured`] if the category is enabled but
    ///   no cipher is set.
    /// - Return [`SyncError::Crypto`] if decryption or writing fails.
    #[instrument(skip(self, artifact), level = "debug")]
    pub fn import(&self, category: SensitiveCategory, artifact: &Path) -> Result<bool> {
        if !category.is_enabled(self.policy) {
            debug!("skip artifact of disabled category {category}");
            return Ok(false);
        }

        let cipher = self
            .cipher
            .ok_or(SyncError::NotConfigured { category })?;
        let destination = category.source(self.root);
        if let Some(parent) = destination.parent() {
            create_dirs(parent)?;
        }

        info!("decrypt {category} into {:?}", destination.display());
        cipher.decrypt_file(artifact, &destination)?;
        Ok(true)
    }
}

// INVARIANT: Every encryption draws a fresh nonce, so an artifact is only
// rewritten when its plaintext actually changed.
fn is_current(cipher: &dyn Cipher, source: &Path, artifact: &Path) -> Result<bool> {
    let blob = match read(artifact) {
        Ok(blob) => blob,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(SyncError::Io {
                source: err,
                path: artifact.into(),
            })
        }
    };
    let plaintext = read(source).map_err(|err| SyncError::Io {
        source: err,
        path: source.into(),
    })?;

    Ok(cipher
        .decrypt(&blob)
        .is_ok_and(|decrypted| decrypted == plaintext))
}
