//! Certman Authority
//!
//! The certificate authority built on `certman-core`:
//! - Bootstraps and persists the root certificate
//! - Issues, exports, imports and removes signing and encryption certificates
//! - Signs and verifies files with detached `.pqsig` signatures
//! - Authorizes signed commands against `no-read` / `no-write`
//!
//! ## Commands
//!
//! - `certman/root/show`
//! - `certman/root/generate name=<string>`
//! - `certman/root/export file=<path> [secret=yes] [force=yes]`
//! - `certman/root/import file=<path>`
//! - `certman/signing/show`
//! - `certman/signing/generate name=<string> parent-serial=<uint> flags=<list>`
//! - `certman/signing/export serial=<uint> file=<path> [secret=yes] [force=yes]`
//! - `certman/signing/import file=<path>`
//! - `certman/signing/remove serial=<uint>`
//! - `certman/signing/sign-file serial=<uint> file=<path> signature-file=<path>`
//! - `certman/signing/verify-file-signature file=<path> signature-file=<path>`
//! - `certman/encryption/show`
//! - `certman/encryption/generate name=<string> parent-serial=<uint> [flags=<list>]`
//! - `certman/encryption/export serial=<uint> file=<path> [secret=yes] [force=yes]`
//! - `certman/encryption/import file=<path>`
//! - `certman/encryption/remove serial=<uint>`

pub mod cli;
pub mod config;
pub mod error;
pub mod service;
pub mod storage;

pub use cli::{Command, CliError};
pub use config::{CertmanConfig, ConfigError};
pub use error::{AuthorityError, Result};
pub use service::{CertificateAuthorityService, CertificateFamily};
pub use storage::{
    FileBackend, MemoryBackend, PersistedStore, StorageError, StoreBackend, StoreLock,
};
