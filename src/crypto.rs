// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Encryption capability.
//!
//! Sensitive files never leave the live tree in plaintext. Whatever encrypts
//! them only has to satisfy the [`Cipher`] trait: turn a byte stream into
//! another byte stream, and back again.
//!
//! # Encrypted Blob Layout
//!
//! [`KeyCipher`] uses XChaCha20-Poly1305 with a 256-bit key. Each blob is laid
//! out as follows:
//!
//! ```text
//! +----------------+-----------------+----------------------+
//! | magic (8 byte) | nonce (24 byte) | ciphertext + tag     |
//! | "OXISYNC1"     | random          | (len(plaintext) + 16)|
//! +----------------+-----------------+----------------------+
//! ```
//!
//! A fresh random nonce is drawn for every encryption, so encrypting the same
//! plaintext twice never yields the same blob.
//!
//! # Keys
//!
//! The key is kept hex-encoded in a key file that only its owner can read.
//! Anyone who wants to decrypt the mirror on another machine needs a copy of
//! that key file.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Key, XChaCha20Poly1305, XNonce,
};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    fs::{read, read_to_string, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

const MAGIC: &[u8; 8] = b"OXISYNC1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Transform byte streams to and from their encrypted form.
pub trait Cipher {
    /// Encrypt plaintext.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt ciphertext.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Encrypt file at `src` into `dst`.
    ///
    /// The destination is written with owner-only permissions. Its parent
    /// directory must already exist.
    ///
    /// # Errors
    ///
    /// - Return [`CryptoError::Read`] if `src` cannot be read.
    /// - Return [`CryptoError::Write`] if `dst` cannot be written.
    /// - Return [`CryptoError::Encrypt`] if encryption fails.
    fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let plaintext = read(src).map_err(|err| CryptoError::Read {
            source: err,
            path: src.into(),
        })?;
        let ciphertext = self.encrypt(&plaintext)?;
        write_private(dst, &ciphertext).map_err(|err| CryptoError::Write {
            source: err,
            path: dst.into(),
        })
    }

    /// Decrypt file at `src` into `dst`.
    ///
    /// The destination is written with owner-only permissions. Its parent
    /// directory must already exist.
    ///
    /// # Errors
    ///
    /// - Return [`CryptoError::Read`] if `src` cannot be read.
    /// - Return [`CryptoError::Write`] if `dst` cannot be written.
    /// - Return [`CryptoError::Decrypt`] or [`CryptoError::Malformed`] if
    ///   decryption fails.
    fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let ciphertext = read(src).map_err(|err| CryptoError::Read {
            source: err,
            path: src.into(),
        })?;
        let plaintext = self.decrypt(&ciphertext)?;
        write_private(dst, &plaintext).map_err(|err| CryptoError::Write {
            source: err,
            path: dst.into(),
        })
    }
}

/// Identity transform.
///
/// Lets the rest of the pipeline run unchanged in tests, or wherever real
/// encryption is not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// Symmetric XChaCha20-Poly1305 cipher.
pub struct KeyCipher {
    cipher: XChaCha20Poly1305,
}

impl KeyCipher {
    /// Construct new cipher from secret key.
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key.0)),
        }
    }
}

impl Debug for KeyCipher {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("KeyCipher(..)")
    }
}

impl Cipher for KeyCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);

        Ok(blob)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let body = ciphertext
            .strip_prefix(MAGIC.as_slice())
            .ok_or(CryptoError::Malformed)?;
        if body.len() < NONCE_LEN {
            return Err(CryptoError::Malformed);
        }

        let (nonce, sealed) = body.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// Secret 256-bit key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Generate new random key from the operating system's RNG.
    pub fn generate() -> Self {
        let key = XChaCha20Poly1305::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    /// Load key from key file.
    ///
    /// # Errors
    ///
    /// - Return [`CryptoError::ReadKey`] if key file cannot be read.
    /// - Return [`CryptoError::InvalidKey`] if key file content is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        read_to_string(path)
            .map_err(|err| CryptoError::ReadKey {
                source: err,
                path: path.into(),
            })?
            .parse()
    }

    /// Save key to key file with owner-only permissions.
    ///
    /// # Errors
    ///
    /// - Return [`CryptoError::WriteKey`] if key file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_private(path, format!("{self}\n").as_bytes()).map_err(|err| CryptoError::WriteKey {
            source: err,
            path: path.into(),
        })
    }
}

impl FromStr for SecretKey {
    type Err = CryptoError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(data.trim()).map_err(|_| CryptoError::InvalidKey)?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(bytes))
    }
}

impl Display for SecretKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&hex::encode(self.0))
    }
}

impl Debug for SecretKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("SecretKey(..)")
    }
}

/// Write file readable by its owner only.
pub(crate) fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;

    // INVARIANT: Tighten permissions of files that existed before.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::fs::PermissionsExt};
        file.set_permissions(Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Encryption error types.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Plaintext cannot be encrypted.
    #[error("failed to encrypt data")]
    Encrypt,

    /// Ciphertext fails authentication, i.e., wrong key or tampered blob.
    #[error("failed to decrypt data: wrong key or corrupted blob")]
    Decrypt,

    /// Ciphertext is not an encrypted blob at all.
    #[error("data is not an encrypted blob")]
    Malformed,

    /// Key material is not a hex-encoded 256-bit key.
    #[error("key must be {} hex digits", KEY_LEN * 2)]
    InvalidKey,

    /// Key file cannot be read.
    #[error("failed to read key file at {:?}", path.display())]
    ReadKey {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Key file cannot be written.
    #[error("failed to write key file at {:?}", path.display())]
    WriteKey {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Input file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Output file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = CryptoError> = std::result::Result<T, E>;
