//! Vault entries as seen by the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single vault record.
///
/// Deletions are kept as tombstones (`deleted = true`) so that they can be
/// propagated to other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    pub payload: EntryPayload,
}

/// The typed contents of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    Login {
        title: String,
        username: String,
        password: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    SecureNote {
        title: String,
        body: String,
    },
    Card {
        title: String,
        cardholder_name: String,
        number: String,
        expiry_month: u8,
        expiry_year: u16,
        #[serde(default)]
        cvv: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    /// Reference to a TOTP secret. Code generation lives elsewhere.
    Totp {
        title: String,
        #[serde(default)]
        issuer: Option<String>,
        #[serde(default)]
        account_name: Option<String>,
        secret: String,
        algorithm: String,
        digits: u8,
        period: u32,
    },
}

/// Discriminant of [`EntryPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Login,
    SecureNote,
    Card,
    Totp,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SecureNote => "secure_note",
            Self::Card => "card",
            Self::Totp => "totp",
        }
    }
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Login { .. } => EntryKind::Login,
            Self::SecureNote { .. } => EntryKind::SecureNote,
            Self::Card { .. } => EntryKind::Card,
            Self::Totp { .. } => EntryKind::Totp,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Login { title, .. }
            | Self::SecureNote { title, .. }
            | Self::Card { title, .. }
            | Self::Totp { title, .. } => title,
        }
    }
}

impl VaultEntry {
    /// Create a new entry with a fresh id, stamped now
    pub fn new(payload: EntryPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted: false,
            payload,
        }
    }

    /// Replace the payload and bump the modification time
    pub fn update(&mut self, payload: EntryPayload) {
        self.payload = payload;
        self.updated_at = Utc::now();
    }

    /// Turn this entry into a tombstone
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.updated_at = Utc::now();
    }

    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    pub fn title(&self) -> &str {
        self.payload.title()
    }
}
