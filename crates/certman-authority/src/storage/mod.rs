//! Persistence for the certificate store
//!
//! The authority saves a full store snapshot after every mutation. Backends
//! only move snapshots in and out; they never interpret chains.
//!
//! - [`MemoryBackend`]: keeps the last snapshot in memory, for tests and
//!   throwaway sessions
//! - [`FileBackend`]: the `certman.store` file, replaced atomically on save
//!   and guarded by an advisory lock shared between processes

pub mod file;
pub mod memory;

pub use file::{write_atomic, FileBackend};
pub use memory::MemoryBackend;

use certman_core::{CodecError, SchemeKind, StoreSnapshot};
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::path::PathBuf;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a certman store file")]
    BadMagic,

    #[error("Unsupported store file version {0}")]
    UnsupportedVersion(u8),

    #[error("Store file uses unknown signature scheme id {0}")]
    UnknownScheme(u8),

    #[error("Store holds {found} keys but {expected} is configured")]
    SchemeMismatch {
        expected: SchemeKind,
        found: SchemeKind,
    },

    #[error("Corrupt store file: {0}")]
    Corrupt(#[from] CodecError),
}

/// Everything a backend persists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedStore {
    /// Scheme the keys were generated with
    pub scheme: SchemeKind,
    pub snapshot: StoreSnapshot,
}

/// Exclusive hold on a backend, released on drop
#[derive(Debug, Default)]
pub struct StoreLock {
    _file: Option<File>,
}

impl StoreLock {
    /// Guard for a backend with nothing to lock
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub(crate) fn held(file: File) -> Self {
        Self { _file: Some(file) }
    }
}

/// Storage backend for the authority's certificate store
///
/// Implementations must be thread-safe. The service holds [`StoreBackend::lock`]
/// across every load, change and save, so a backend shared by several
/// processes must make that lock exclusive between them.
pub trait StoreBackend: Send + Sync + Debug {
    /// Load the last saved store, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<PersistedStore>, StorageError>;

    /// Replace the saved store
    fn save(&self, store: &PersistedStore) -> Result<(), StorageError>;

    /// Block until no other writer holds the store
    ///
    /// Backends private to one process rely on the service's writer mutex.
    fn lock(&self) -> Result<StoreLock, StorageError> {
        Ok(StoreLock::unlocked())
    }
}
