//! Whole-set entry storage.

use crate::crypto::SessionKey;
use crate::entry::VaultEntry;
use crate::Result;
use parking_lot::RwLock;
use uuid::Uuid;

/// Local record storage as seen by the sync engine.
///
/// The key is passed on every call so implementations that encrypt at rest
/// never need to hold it.
pub trait EntryStore: Send + Sync {
    /// Load every entry, tombstones included
    fn load_all(&self, key: &SessionKey) -> Result<Vec<VaultEntry>>;

    /// Atomically replace the whole entry set
    fn replace_all(&self, key: &SessionKey, entries: &[VaultEntry]) -> Result<()>;
}

/// Plain in-memory entry store
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<Vec<VaultEntry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<VaultEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Insert or replace a single entry by id
    pub fn upsert(&self, entry: VaultEntry) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<VaultEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EntryStore for MemoryEntryStore {
    fn load_all(&self, _key: &SessionKey) -> Result<Vec<VaultEntry>> {
        Ok(self.entries.read().clone())
    }

    fn replace_all(&self, _key: &SessionKey, entries: &[VaultEntry]) -> Result<()> {
        *self.entries.write() = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryPayload;

    fn note(title: &str) -> VaultEntry {
        VaultEntry::new(EntryPayload::SecureNote {
            title: title.to_string(),
            body: String::new(),
        })
    }

    #[test]
    fn test_upsert_and_replace() {
        let key = SessionKey::from_bytes([7u8; 32]);
        let store = MemoryEntryStore::new();
        assert!(store.is_empty());

        let mut a = note("a");
        store.upsert(a.clone());
        store.upsert(note("b"));
        assert_eq!(store.len(), 2);

        a.mark_deleted();
        store.upsert(a.clone());
        assert_eq!(store.len(), 2);
        assert!(store.get(a.id).unwrap().deleted);

        store.replace_all(&key, &[a.clone()]).unwrap();
        assert_eq!(store.load_all(&key).unwrap(), vec![a]);
    }
}
