//! SQLite persistence for the secure key-value store and vault entries.
//!
//! Both stores share one [`Database`] behind an `Arc<Mutex<_>>`.

pub mod entries;
pub mod kv;
pub mod schema;

pub use entries::SqliteEntryStore;
pub use kv::SqliteSecureStore;
pub use schema::Database;

use crate::{Result, VaultError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to an open database
pub type SharedDatabase = Arc<Mutex<Database>>;

pub(crate) fn lock(db: &SharedDatabase) -> Result<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|_| VaultError::Storage("Database lock poisoned".to_string()))
}
