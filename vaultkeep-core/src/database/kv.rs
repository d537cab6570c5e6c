//! SQLite-backed [`SecureStore`].

use crate::database::{lock, SharedDatabase};
use crate::store::{SecureStore, StoreKey};
use crate::Result;
use chrono::Utc;
use rusqlite::OptionalExtension;

/// Secure key-value slots in the `secure_kv` table
pub struct SqliteSecureStore {
    db: SharedDatabase,
}

impl SqliteSecureStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl SecureStore for SqliteSecureStore {
    fn read(&self, key: StoreKey) -> Result<Option<Vec<u8>>> {
        let db = lock(&self.db)?;
        let value = db
            .conn()
            .query_row(
                "SELECT value FROM secure_kv WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: StoreKey, value: &[u8]) -> Result<()> {
        let db = lock(&self.db)?;
        db.conn().execute(
            "INSERT INTO secure_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key.as_str(), value, Utc::now().timestamp()),
        )?;
        Ok(())
    }

    fn delete(&self, key: StoreKey) -> Result<()> {
        let db = lock(&self.db)?;
        db.conn()
            .execute("DELETE FROM secure_kv WHERE key = ?1", [key.as_str()])?;
        Ok(())
    }
}
