//! SQLite-backed [`EntryStore`]. Each entry is stored as an encrypted
//! envelope of its JSON form.

use crate::crypto::{decrypt, encrypt, EncryptedEnvelope, SessionKey};
use crate::database::{lock, SharedDatabase};
use crate::entry::VaultEntry;
use crate::store::{EntryStore, StoreKey};
use crate::Result;
use chrono::Utc;
use rusqlite::Transaction;
use tracing::debug;

pub struct SqliteEntryStore {
    db: SharedDatabase,
}

type EntryRow = (String, i64, bool, Vec<u8>);

impl SqliteEntryStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Replace the entry set under `key` and store the credential record
    /// that derives `key`, in one transaction.
    ///
    /// Used for password changes: either both the new credential and the
    /// re-encrypted entries are committed, or neither is.
    pub fn replace_all_with_credential(
        &self,
        key: &SessionKey,
        entries: &[VaultEntry],
        credential: &[u8],
    ) -> Result<()> {
        let rows = encrypt_rows(key, entries)?;

        let db = lock(&self.db)?;
        let tx = db.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO secure_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (StoreKey::Credential.as_str(), credential, Utc::now().timestamp()),
        )?;
        write_rows(&tx, &rows)?;
        tx.commit()?;

        debug!("Re-encrypted {} entries under a new credential", rows.len());
        Ok(())
    }
}

/// Encrypt everything before touching the table
fn encrypt_rows(key: &SessionKey, entries: &[VaultEntry]) -> Result<Vec<EntryRow>> {
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let json = serde_json::to_vec(entry)?;
        let envelope = encrypt(key, &json)?.to_json()?;
        rows.push((entry.id.to_string(), entry.updated_at.timestamp(), entry.deleted, envelope));
    }
    Ok(rows)
}

fn write_rows(tx: &Transaction<'_>, rows: &[EntryRow]) -> Result<()> {
    tx.execute("DELETE FROM entries", [])?;
    let mut stmt = tx.prepare(
        "INSERT INTO entries (entry_id, updated_at, deleted, envelope) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (id, updated_at, deleted, envelope) in rows {
        stmt.execute((id, updated_at, deleted, envelope))?;
    }
    Ok(())
}

impl EntryStore for SqliteEntryStore {
    fn load_all(&self, key: &SessionKey) -> Result<Vec<VaultEntry>> {
        let db = lock(&self.db)?;
        let mut stmt = db
            .conn()
            .prepare("SELECT envelope FROM entries ORDER BY entry_id")?;
        let blobs = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let envelope = EncryptedEnvelope::from_json(&blob)?;
            let plaintext = decrypt(key, &envelope)?;
            entries.push(serde_json::from_slice(&plaintext)?);
        }
        Ok(entries)
    }

    fn replace_all(&self, key: &SessionKey, entries: &[VaultEntry]) -> Result<()> {
        let rows = encrypt_rows(key, entries)?;

        let db = lock(&self.db)?;
        let tx = db.conn().unchecked_transaction()?;
        write_rows(&tx, &rows)?;
        tx.commit()?;

        debug!("Replaced local entry set ({} entries)", rows.len());
        Ok(())
    }
}
