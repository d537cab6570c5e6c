//! Conflict resolution strategies.

use crate::entry::{EntryPayload, VaultEntry};
use crate::sync::models::ConflictRecord;
use crate::{Result, VaultError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Strategy for a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// Combine both sides with the configured merge function
    Merge,
    /// Leave the conflict for the next sync
    Skip,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
            Self::Skip => "skip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keep_local" | "local" => Some(Self::KeepLocal),
            "keep_remote" | "remote" => Some(Self::KeepRemote),
            "merge" => Some(Self::Merge),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntry {
    /// The version both sides will store
    Chosen(VaultEntry),
    Unresolved { entry_id: Uuid },
}

impl ResolvedEntry {
    pub fn entry_id(&self) -> Uuid {
        match self {
            Self::Chosen(entry) => entry.id,
            Self::Unresolved { entry_id } => *entry_id,
        }
    }
}

/// Caller-supplied merge of `(local, remote)` into one entry.
pub type MergeFn = Arc<dyn Fn(&VaultEntry, &VaultEntry) -> Result<VaultEntry> + Send + Sync>;

/// Applies [`Resolution`]s to [`ConflictRecord`]s.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    merge: Option<MergeFn>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_merge(merge: MergeFn) -> Self {
        Self { merge: Some(merge) }
    }

    /// Resolver using [`field_union`] for `Merge`
    pub fn with_field_union() -> Self {
        Self::with_merge(Arc::new(field_union))
    }

    pub fn resolve(&self, conflict: &ConflictRecord, strategy: Resolution) -> Result<ResolvedEntry> {
        match strategy {
            Resolution::KeepLocal => Ok(ResolvedEntry::Chosen(conflict.local.clone())),
            Resolution::KeepRemote => Ok(ResolvedEntry::Chosen(conflict.remote.clone())),
            Resolution::Skip => Ok(ResolvedEntry::Unresolved {
                entry_id: conflict.entry_id,
            }),
            Resolution::Merge => {
                if conflict.local.deleted || conflict.remote.deleted {
                    return Err(VaultError::Conflict(format!(
                        "Cannot merge entry {}: one side was deleted",
                        conflict.entry_id
                    )));
                }
                let merge = self.merge.as_ref().ok_or_else(|| {
                    VaultError::Conflict("No merge function configured".to_string())
                })?;

                let mut merged = merge(&conflict.local, &conflict.remote)?;
                merged.id = conflict.entry_id;
                merged.deleted = false;
                merged.created_at = conflict.local.created_at.min(conflict.remote.created_at);
                merged.updated_at = Utc::now();
                Ok(ResolvedEntry::Chosen(merged))
            }
        }
    }

    /// Resolve every conflict or none.
    ///
    /// A conflict without a strategy, or a failing merge, aborts the whole
    /// batch.
    pub fn resolve_all(
        &self,
        conflicts: &[ConflictRecord],
        strategies: &HashMap<Uuid, Resolution>,
    ) -> Result<Vec<ResolvedEntry>> {
        conflicts
            .iter()
            .map(|conflict| {
                let strategy = strategies.get(&conflict.entry_id).ok_or_else(|| {
                    VaultError::Conflict(format!(
                        "No resolution given for entry {}",
                        conflict.entry_id
                    ))
                })?;
                self.resolve(conflict, *strategy)
            })
            .collect()
    }
}

/// Stock merge: same-kind payloads, newer side's non-empty fields first.
pub fn field_union(local: &VaultEntry, remote: &VaultEntry) -> Result<VaultEntry> {
    let (newer, older) = if remote.updated_at > local.updated_at {
        (remote, local)
    } else {
        (local, remote)
    };

    let payload = match (&newer.payload, &older.payload) {
        (
            EntryPayload::Login {
                title,
                username,
                password,
                url,
                notes,
            },
            EntryPayload::Login {
                title: o_title,
                username: o_username,
                password: o_password,
                url: o_url,
                notes: o_notes,
            },
        ) => EntryPayload::Login {
            title: pick(title, o_title),
            username: pick(username, o_username),
            password: pick(password, o_password),
            url: pick_opt(url, o_url),
            notes: pick_opt(notes, o_notes),
        },
        (
            EntryPayload::SecureNote { title, body },
            EntryPayload::SecureNote {
                title: o_title,
                body: o_body,
            },
        ) => EntryPayload::SecureNote {
            title: pick(title, o_title),
            body: pick(body, o_body),
        },
        (
            EntryPayload::Card {
                title,
                cardholder_name,
                number,
                expiry_month,
                expiry_year,
                cvv,
                notes,
            },
            EntryPayload::Card {
                title: o_title,
                cardholder_name: o_cardholder_name,
                number: o_number,
                cvv: o_cvv,
                notes: o_notes,
                ..
            },
        ) => EntryPayload::Card {
            title: pick(title, o_title),
            cardholder_name: pick(cardholder_name, o_cardholder_name),
            number: pick(number, o_number),
            expiry_month: *expiry_month,
            expiry_year: *expiry_year,
            cvv: pick_opt(cvv, o_cvv),
            notes: pick_opt(notes, o_notes),
        },
        (
            EntryPayload::Totp {
                title,
                issuer,
                account_name,
                secret,
                algorithm,
                digits,
                period,
            },
            EntryPayload::Totp {
                title: o_title,
                issuer: o_issuer,
                account_name: o_account_name,
                secret: o_secret,
                algorithm: o_algorithm,
                ..
            },
        ) => EntryPayload::Totp {
            title: pick(title, o_title),
            issuer: pick_opt(issuer, o_issuer),
            account_name: pick_opt(account_name, o_account_name),
            secret: pick(secret, o_secret),
            algorithm: pick(algorithm, o_algorithm),
            digits: *digits,
            period: *period,
        },
        (a, b) => {
            return Err(VaultError::Conflict(format!(
                "Cannot merge a {} entry with a {} entry",
                a.kind().as_str(),
                b.kind().as_str()
            )))
        }
    };

    Ok(VaultEntry {
        payload,
        ..newer.clone()
    })
}

fn pick(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

fn pick_opt(preferred: &Option<String>, fallback: &Option<String>) -> Option<String> {
    match preferred {
        Some(s) if !s.is_empty() => Some(s.clone()),
        _ => fallback.clone(),
    }
}
