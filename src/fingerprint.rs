// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content fingerprints.
//!
//! Detect file drift by content instead of timestamps. A fingerprint is the
//! hex-encoded SHA-256 digest of the full file content. Two files are
//! considered identical if and only if their fingerprints match.

use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::File,
    io::{copy, BufReader},
    path::{Path, PathBuf},
};

/// Hex-encoded SHA-256 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint file at target path.
    ///
    /// Reads the whole file sequentially. Nothing is sampled.
    ///
    /// # Errors
    ///
    /// - Return [`FingerprintError`] if file cannot be opened or read.
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| FingerprintError {
            source: err,
            path: path.into(),
        })?;

        let mut hasher = Sha256::new();
        copy(&mut BufReader::new(file), &mut hasher).map_err(|err| FingerprintError {
            source: err,
            path: path.into(),
        })?;

        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Fingerprint raw bytes.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(Sha256::digest(bytes.as_ref())))
    }

    /// Treat fingerprint as hex string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// File cannot be read for fingerprinting.
#[derive(Debug, thiserror::Error)]
#[error("failed to fingerprint {:?}", path.display())]
pub struct FingerprintError {
    #[source]
    source: std::io::Error,
    path: PathBuf,
}

impl FingerprintError {
    /// Path of the unreadable file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

/// Friendly result alias :3
pub type Result<T, E = FingerprintError> = std::result::Result<T, E>;
