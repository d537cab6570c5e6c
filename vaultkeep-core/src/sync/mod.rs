//! End-to-end encrypted vault sync.
//!
//! The whole entry set travels as one encrypted document:
//! - Checksum check first, so an unchanged remote costs one small request
//! - Three-way merge against the last sync time, with explicit conflicts
//! - Remote is written before local, so a failed upload changes nothing

pub mod config;
pub mod conflict;
pub mod engine;
pub mod history;
pub(crate) mod merge;
pub mod models;
pub mod payload;
pub mod remote;
pub mod scheduler;
#[cfg(feature = "webdav")]
pub mod webdav;

pub use config::{SyncConfig, SyncCredentials, SyncMode};
pub use conflict::{field_union, ConflictResolver, MergeFn, Resolution, ResolvedEntry};
pub use engine::SyncEngine;
pub use history::SyncHistory;
pub use models::{
    ConflictKind, ConflictRecord, ConnectionResult, SyncCounts, SyncOutcome, SyncProgress,
    SyncResult, SyncSession, SyncSnapshot, SyncStatus,
};
pub use payload::VaultPayload;
pub use remote::{MemoryRemote, NetworkError, RemoteStore};
pub use scheduler::AutoSync;
#[cfg(feature = "webdav")]
pub use webdav::WebDavRemote;
