// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror OpenCode's configuration through Git.
//!
//! Oxisync keeps the live configuration tree of OpenCode consistent with a
//! version-controlled __mirror__, so the same setup can be reproduced on
//! multiple machines. Credential files only ever travel encrypted.
//!
//! # See Also
//!
//! 1. [`sync`]
//! 2. [`vcs`]

pub mod catalog;
pub mod config;
pub mod crypto;
pub mod exclude;
pub mod fingerprint;
pub mod path;
pub mod sync;
pub mod vcs;

pub use catalog::{PathCatalog, SyncRoot};
pub use config::{PolicyViolation, SyncPolicy};
pub use crypto::{Cipher, KeyCipher, NoopCipher, SecretKey};
pub use exclude::{should_exclude, ExclusionMatcher};
pub use fingerprint::Fingerprint;
pub use path::{ConfigurationRoot, ExternalRoot, MirrorRoot, ToolDirs};
pub use sync::{
    state::{FileRecord, SyncState},
    SyncContext, SyncEngine, SyncError, SyncOutcome,
};
pub use vcs::{AnyMirror, Backend, MirrorAccess, MirrorRepository, RepoStatus, VcsError};
