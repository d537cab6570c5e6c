//! Three-way comparison of local and remote entry sets.

use crate::entry::VaultEntry;
use crate::sync::conflict::ResolvedEntry;
use crate::sync::models::{ConflictKind, ConflictRecord, SyncCounts};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Outcome of comparing two entry sets, before conflicts are resolved.
#[derive(Debug, Clone)]
pub(crate) struct MergePlan {
    /// Entries both sides will agree on
    agreed: BTreeMap<Uuid, VaultEntry>,
    conflicts: Vec<ConflictRecord>,
    original_local: HashMap<Uuid, VaultEntry>,
    original_remote: HashMap<Uuid, VaultEntry>,
}

/// Entry sets to write back once every conflict has a resolution.
#[derive(Debug, Clone)]
pub(crate) struct MergeResult {
    pub local: Vec<VaultEntry>,
    pub remote: Vec<VaultEntry>,
    pub counts: SyncCounts,
    pub skipped: Vec<Uuid>,
    /// Whether `local` differs from the set the plan was built from
    pub local_changed: bool,
}

impl MergePlan {
    /// Compare by id against the time of the last successful sync.
    ///
    /// With no recorded sync every entry counts as changed on both sides.
    pub fn build(
        local: Vec<VaultEntry>,
        remote: Vec<VaultEntry>,
        last_sync: Option<DateTime<Utc>>,
    ) -> Self {
        let original_local: HashMap<Uuid, VaultEntry> =
            local.into_iter().map(|e| (e.id, e)).collect();
        let original_remote: HashMap<Uuid, VaultEntry> =
            remote.into_iter().map(|e| (e.id, e)).collect();

        let ids: BTreeSet<Uuid> = original_local
            .keys()
            .chain(original_remote.keys())
            .copied()
            .collect();

        let changed = |entry: &VaultEntry| last_sync.map_or(true, |t| entry.updated_at > t);
        let created = |entry: &VaultEntry| last_sync.map_or(true, |t| entry.created_at > t);

        let mut agreed = BTreeMap::new();
        let mut conflicts = Vec::new();

        for id in ids {
            let (l, r) = match (original_local.get(&id), original_remote.get(&id)) {
                (Some(l), None) => {
                    agreed.insert(id, l.clone());
                    continue;
                }
                (None, Some(r)) => {
                    agreed.insert(id, r.clone());
                    continue;
                }
                (Some(l), Some(r)) => (l, r),
                (None, None) => continue,
            };

            if l == r {
                agreed.insert(id, l.clone());
                continue;
            }

            let winner = match (changed(l), changed(r)) {
                (true, false) => l,
                (false, true) => r,
                (true, true) => {
                    let kind = match (l.deleted, r.deleted) {
                        (true, true) => None,
                        (true, false) => Some(ConflictKind::DeleteModify),
                        (false, true) => Some(ConflictKind::ModifyDelete),
                        (false, false) if created(l) && created(r) => Some(ConflictKind::AddAdd),
                        (false, false) => Some(ConflictKind::ModifyModify),
                    };
                    match kind {
                        Some(kind) => {
                            conflicts.push(ConflictRecord::new(kind, l.clone(), r.clone()));
                            continue;
                        }
                        None => newer(l, r),
                    }
                }
                (false, false) => newer(l, r),
            };
            agreed.insert(id, winner.clone());
        }

        Self {
            agreed,
            conflicts,
            original_local,
            original_remote,
        }
    }

    /// Local set replaces the remote wholesale.
    pub fn take_local(local: Vec<VaultEntry>) -> Self {
        Self::one_sided(local.clone(), local, Vec::new())
    }

    /// Remote set replaces the local one wholesale.
    pub fn take_remote(local: Vec<VaultEntry>, remote: Vec<VaultEntry>) -> Self {
        Self::one_sided(remote.clone(), local, remote)
    }

    fn one_sided(winner: Vec<VaultEntry>, local: Vec<VaultEntry>, remote: Vec<VaultEntry>) -> Self {
        Self {
            agreed: winner.into_iter().map(|e| (e.id, e)).collect(),
            conflicts: Vec::new(),
            original_local: local.into_iter().map(|e| (e.id, e)).collect(),
            original_remote: remote.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Apply conflict resolutions and produce the two sides to write.
    ///
    /// A skipped conflict keeps each side's own version.
    pub fn finalize(&self, resolved: &[ResolvedEntry]) -> Result<MergeResult> {
        let by_id: HashMap<Uuid, &ResolvedEntry> =
            resolved.iter().map(|r| (r.entry_id(), r)).collect();

        let mut local = self.agreed.clone();
        let mut remote = self.agreed.clone();
        let mut skipped = Vec::new();

        for conflict in &self.conflicts {
            match by_id.get(&conflict.entry_id) {
                Some(ResolvedEntry::Chosen(entry)) => {
                    local.insert(conflict.entry_id, entry.clone());
                    remote.insert(conflict.entry_id, entry.clone());
                }
                Some(ResolvedEntry::Unresolved { entry_id }) => {
                    local.insert(*entry_id, conflict.local.clone());
                    remote.insert(*entry_id, conflict.remote.clone());
                    skipped.push(*entry_id);
                }
                None => {
                    return Err(VaultError::Conflict(format!(
                        "No resolution for entry {}",
                        conflict.entry_id
                    )))
                }
            }
        }

        let counts = self.count_changes(&local, &remote);
        let local_changed = local.len() != self.original_local.len()
            || local
                .iter()
                .any(|(id, entry)| self.original_local.get(id) != Some(entry));

        Ok(MergeResult {
            local: local.into_values().collect(),
            remote: remote.into_values().collect(),
            counts,
            skipped,
            local_changed,
        })
    }

    fn count_changes(
        &self,
        local: &BTreeMap<Uuid, VaultEntry>,
        remote: &BTreeMap<Uuid, VaultEntry>,
    ) -> SyncCounts {
        let mut counts = SyncCounts::default();

        for (id, entry) in local {
            match self.original_local.get(id) {
                None if entry.deleted => {}
                None => counts.added += 1,
                Some(before) if before == entry => {}
                Some(before) if entry.deleted && !before.deleted => counts.deleted += 1,
                Some(_) => counts.updated += 1,
            }
        }

        counts.uploaded = remote
            .iter()
            .filter(|&(id, entry)| self.original_remote.get(id) != Some(entry))
            .count();

        counts
    }
}

fn newer<'a>(local: &'a VaultEntry, remote: &'a VaultEntry) -> &'a VaultEntry {
    if remote.updated_at > local.updated_at {
        remote
    } else {
        local
    }
}
