//! In-memory storage backend
//!
//! Holds the last saved snapshot. Data is lost when the process exits.

use std::sync::RwLock;
use tracing::debug;

use super::{PersistedStore, StorageError, StoreBackend};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    saved: RwLock<Option<PersistedStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing saved store
    pub fn with_store(store: PersistedStore) -> Self {
        Self {
            saved: RwLock::new(Some(store)),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<Option<PersistedStore>, StorageError> {
        let saved = self.saved.read().unwrap_or_else(|e| e.into_inner());
        Ok(saved.clone())
    }

    fn save(&self, store: &PersistedStore) -> Result<(), StorageError> {
        let mut saved = self.saved.write().unwrap_or_else(|e| e.into_inner());
        debug!(records = store.snapshot.records.len(), "Saved store in memory");
        *saved = Some(store.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certman_core::{SchemeKind, StoreSnapshot};

    #[test]
    fn test_load_before_save_is_empty() {
        assert_eq!(MemoryBackend::new().load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let backend = MemoryBackend::new();
        let store = PersistedStore {
            scheme: SchemeKind::Ed25519,
            snapshot: StoreSnapshot {
                next_serial: 4,
                records: Vec::new(),
            },
        };

        backend.save(&store).unwrap();

        assert_eq!(backend.load().unwrap(), Some(store));
    }
}
