//! Vaultkeep Core Library
//!
//! Key management, unlock gating and end-to-end encrypted synchronization
//! for a personal vault:
//! - Argon2id master key derivation and AES-256-GCM envelopes
//! - An unlock gate with escalating lockout
//! - Whole-vault sync against a WebDAV remote with conflict detection

pub mod auth;
pub mod crypto;
pub mod database;
pub mod entry;
pub mod platform;
pub mod store;
pub mod sync;

pub use auth::{
    AuthGate, AuthState, KeyRotation, LockReason, LockoutPolicy, LockoutState, LockoutStatus,
    PasswordChange,
};
pub use crypto::{
    decrypt, derive_key_material, encrypt, generate_nonce, generate_salt, verify_hash,
    CryptoError, EncryptedEnvelope, KdfParams, MasterKeyMaterial, SecureBuffer, SessionKey,
};
pub use database::{Database, SqliteEntryStore, SqliteSecureStore};
pub use entry::{EntryKind, EntryPayload, VaultEntry};
pub use store::{EntryStore, MemoryEntryStore, MemoryStore, SecureStore, StoreKey};
pub use sync::{
    AutoSync, ConflictKind, ConflictRecord, ConflictResolver, ConnectionResult, MemoryRemote,
    NetworkError, RemoteStore, Resolution, SyncConfig, SyncCredentials, SyncEngine, SyncMode,
    SyncOutcome, SyncResult, SyncSnapshot, SyncStatus,
};

use thiserror::Error;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Error type for vault operations.
///
/// Wrong password and lockout are distinct variants so callers can always
/// tell them apart.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Authentication failed: wrong master password")]
    Authentication,

    #[error("Too many failed attempts, try again in {} minute(s)", remaining_minutes(.remaining_secs))]
    Lockout { remaining_secs: i64 },

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Network error: {0}")]
    Network(#[from] sync::NetworkError),

    #[error("Sync conflict: {0}")]
    Conflict(String),

    #[error("Sync is not configured: {0}")]
    Configuration(String),

    #[error("Vault is locked")]
    Locked,

    #[error("No master password has been set")]
    NotInitialized,

    #[error("A master password is already set")]
    AlreadyInitialized,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Remaining lockout time rounded up to whole minutes, if this is a lockout.
    pub fn lockout_minutes(&self) -> Option<i64> {
        match self {
            Self::Lockout { remaining_secs } => Some(remaining_minutes(remaining_secs)),
            _ => None,
        }
    }

    /// Whether the user can reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Network(_) | Self::SyncInProgress | Self::Cancelled
        )
    }
}

fn remaining_minutes(secs: &i64) -> i64 {
    ((*secs).max(0) + 59) / 60
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_minutes_round_up() {
        assert_eq!(VaultError::Lockout { remaining_secs: 1 }.lockout_minutes(), Some(1));
        assert_eq!(VaultError::Lockout { remaining_secs: 300 }.lockout_minutes(), Some(5));
        assert_eq!(VaultError::Lockout { remaining_secs: 301 }.lockout_minutes(), Some(6));
        assert_eq!(VaultError::Authentication.lockout_minutes(), None);
    }

    #[test]
    fn lockout_message_mentions_minutes() {
        let err = VaultError::Lockout { remaining_secs: 1790 };
        assert_eq!(
            err.to_string(),
            "Too many failed attempts, try again in 30 minute(s)"
        );
    }

    #[test]
    fn wrong_password_and_lockout_are_distinct() {
        assert!(VaultError::Authentication.is_retryable());
        assert!(!VaultError::Lockout { remaining_secs: 60 }.is_retryable());
    }
}
