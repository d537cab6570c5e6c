//! Sync data models: snapshots, conflicts, sessions and results.

use crate::entry::VaultEntry;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Snapshot format version, part of the checksum input
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// State of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Checking,
    Uploading,
    Downloading,
    Merging,
    Conflicted,
    Resolving,
    Success,
    Failure,
}

impl SyncStatus {
    /// Convert sync status to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Conflicted => "conflicted",
            Self::Resolving => "resolving",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parse a sync status from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "checking" => Some(Self::Checking),
            "uploading" => Some(Self::Uploading),
            "downloading" => Some(Self::Downloading),
            "merging" => Some(Self::Merging),
            "conflicted" => Some(Self::Conflicted),
            "resolving" => Some(Self::Resolving),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Metadata of one entry as it takes part in the checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl From<&VaultEntry> for EntrySummary {
    fn from(entry: &VaultEntry) -> Self {
        Self {
            id: entry.id,
            updated_at: entry.updated_at,
            deleted: entry.deleted,
        }
    }
}

/// Canonical description of an entry set.
///
/// Entries are sorted by id, so the checksum does not depend on the order
/// in which entries were inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub format_version: u32,
    pub entries: Vec<EntrySummary>,
    pub checksum: String,
}

impl SyncSnapshot {
    pub fn from_entries(entries: &[VaultEntry]) -> Self {
        let mut summaries: Vec<EntrySummary> = entries.iter().map(EntrySummary::from).collect();
        summaries.sort_by_key(|s| s.id);
        let checksum = canonical_checksum(&summaries);
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries: summaries,
            checksum,
        }
    }
}

/// Hex SHA-256 over `v1\n` followed by one `id|updated_at|deleted` line per
/// entry. `entries` must already be sorted by id.
fn canonical_checksum(entries: &[EntrySummary]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("v{}\n", SNAPSHOT_FORMAT_VERSION).as_bytes());
    for entry in entries {
        let line = format!(
            "{}|{}|{}\n",
            entry.id.as_hyphenated(),
            entry.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            u8::from(entry.deleted)
        );
        hasher.update(line.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// How two versions of one entry diverged since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ModifyModify,
    /// Deleted locally, modified remotely
    DeleteModify,
    /// Modified locally, deleted remotely
    ModifyDelete,
    /// Created independently on both sides
    AddAdd,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModifyModify => "modify_modify",
            Self::DeleteModify => "delete_modify",
            Self::ModifyDelete => "modify_delete",
            Self::AddAdd => "add_add",
        }
    }
}

/// A pair of concurrent edits that needs a decision.
///
/// A deleted side is carried as its tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub entry_id: Uuid,
    pub kind: ConflictKind,
    pub local_modified_at: DateTime<Utc>,
    pub remote_modified_at: DateTime<Utc>,
    pub local: VaultEntry,
    pub remote: VaultEntry,
}

impl ConflictRecord {
    pub fn new(kind: ConflictKind, local: VaultEntry, remote: VaultEntry) -> Self {
        Self {
            entry_id: local.id,
            kind,
            local_modified_at: local.updated_at,
            remote_modified_at: remote.updated_at,
            local,
            remote,
        }
    }
}

/// Changes applied to the local entry set, plus pushes to the remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub uploaded: usize,
}

impl SyncCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Published on the progress channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncProgress {
    pub status: SyncStatus,
    /// 0.0 to 1.0, non-decreasing within a session
    pub fraction: f32,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            fraction: 0.0,
        }
    }
}

/// Bookkeeping for one sync invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: Uuid,
    pub status: SyncStatus,
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: SyncCounts,
    pub conflicts: usize,
    pub error: Option<String>,
}

impl SyncSession {
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SyncStatus::Checking,
            progress: 0.0,
            started_at: Utc::now(),
            completed_at: None,
            counts: SyncCounts::default(),
            conflicts: 0,
            error: None,
        }
    }

    /// Move to `status`. Progress never goes backwards.
    pub fn advance(&mut self, status: SyncStatus, progress: f32) -> SyncProgress {
        self.status = status;
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        SyncProgress {
            status,
            fraction: self.progress,
        }
    }

    pub fn succeed(&mut self, counts: SyncCounts) -> SyncProgress {
        self.counts = counts;
        self.completed_at = Some(Utc::now());
        self.advance(SyncStatus::Success, 1.0)
    }

    pub fn fail(&mut self, error: String) -> SyncProgress {
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        let progress = self.progress;
        self.advance(SyncStatus::Failure, progress)
    }
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub counts: SyncCounts,
    /// Checksum of the entry set now on the remote
    pub checksum: String,
    pub completed_at: DateTime<Utc>,
    /// Conflicts left unresolved by `Skip`
    pub skipped: Vec<Uuid>,
}

impl SyncResult {
    pub fn is_noop(&self) -> bool {
        self.counts.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncResult),
    /// The cycle is paused until every conflict has a resolution
    Conflicted(Vec<ConflictRecord>),
}

/// Result of a remote connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
}
