//! Storage collaborators: the secure key-value store and the entry store.
//!
//! Both are traits so the gate and the sync engine can run against the
//! in-memory implementations here or the SQLite ones in
//! [`crate::database`].

pub mod entries;

pub use entries::{EntryStore, MemoryEntryStore};

use crate::{Result, VaultError};
use parking_lot::Mutex;
use std::collections::HashMap;
use zeroize::Zeroize;

/// Well-known slots in the secure store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Salt, KDF parameters and verification hash as one record
    Credential,
    FailedAttempts,
    LockedUntil,
    SyncUsername,
    SyncPassword,
    LastSyncAt,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "auth.credential",
            Self::FailedAttempts => "auth.failed_attempts",
            Self::LockedUntil => "auth.locked_until",
            Self::SyncUsername => "sync.username",
            Self::SyncPassword => "sync.password",
            Self::LastSyncAt => "sync.last_sync_at",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auth.credential" => Some(Self::Credential),
            "auth.failed_attempts" => Some(Self::FailedAttempts),
            "auth.locked_until" => Some(Self::LockedUntil),
            "sync.username" => Some(Self::SyncUsername),
            "sync.password" => Some(Self::SyncPassword),
            "sync.last_sync_at" => Some(Self::LastSyncAt),
            _ => None,
        }
    }
}

/// Opaque secure key-value storage.
pub trait SecureStore: Send + Sync {
    fn read(&self, key: StoreKey) -> Result<Option<Vec<u8>>>;

    fn write(&self, key: StoreKey, value: &[u8]) -> Result<()>;

    /// Remove a slot. Removing a missing slot is not an error.
    fn delete(&self, key: StoreKey) -> Result<()>;

    fn read_string(&self, key: StoreKey) -> Result<Option<String>> {
        match self.read(key)? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| {
                VaultError::Storage(format!("{} is not valid UTF-8", key.as_str()))
            }),
            None => Ok(None),
        }
    }

    fn write_string(&self, key: StoreKey, value: &str) -> Result<()> {
        self.write(key, value.as_bytes())
    }
}

/// In-memory secure store. Values are wiped when overwritten or deleted.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<StoreKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn read(&self, key: StoreKey) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.lock().get(&key).cloned())
    }

    fn write(&self, key: StoreKey, value: &[u8]) -> Result<()> {
        if let Some(mut old) = self.slots.lock().insert(key, value.to_vec()) {
            old.zeroize();
        }
        Ok(())
    }

    fn delete(&self, key: StoreKey) -> Result<()> {
        if let Some(mut old) = self.slots.lock().remove(&key) {
            old.zeroize();
        }
        Ok(())
    }
}
