//! Database schema and connection management.

use crate::{Result, VaultError};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Main database connection and schema manager
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path, creating the schema if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize_schema()?;
        db.validate_schema_version()?;
        Ok(db)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema
    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS db_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS secure_kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                entry_id TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                envelope BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_deleted ON entries(deleted);",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO db_metadata (id, version, created_at) VALUES (1, ?1, ?2)",
            (CURRENT_SCHEMA_VERSION, Utc::now().timestamp()),
        )?;
        Ok(())
    }

    /// Reject databases written by a newer schema
    pub fn validate_schema_version(&self) -> Result<()> {
        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM db_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            Some(CURRENT_SCHEMA_VERSION) => Ok(()),
            Some(found) => Err(VaultError::Storage(format!(
                "Schema version mismatch: expected {}, found {}",
                CURRENT_SCHEMA_VERSION, found
            ))),
            None => Err(VaultError::Storage("Missing schema metadata".to_string())),
        }
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
