//! Sync engine: orchestrates the checksum/download/merge/upload cycle.

use crate::auth::AuthGate;
use crate::crypto::SessionKey;
use crate::entry::VaultEntry;
use crate::store::{EntryStore, SecureStore, StoreKey};
use crate::sync::config::{SyncConfig, SyncMode};
use crate::sync::conflict::{ConflictResolver, Resolution, ResolvedEntry};
use crate::sync::history::SyncHistory;
use crate::sync::merge::MergePlan;
use crate::sync::models::{
    ConflictRecord, ConnectionResult, SyncOutcome, SyncProgress, SyncResult, SyncSession,
    SyncSnapshot, SyncStatus,
};
use crate::sync::payload::{self, VaultPayload};
use crate::sync::remote::{NetworkError, RemoteStore};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A cycle paused on conflicts.
struct PendingMerge {
    plan: MergePlan,
    /// Local checksum the plan was built against
    seen_local: String,
    /// Remote checksum the plan was built against
    seen_remote: Option<String>,
    resolved: HashMap<Uuid, ResolvedEntry>,
    session: SyncSession,
}

impl PendingMerge {
    fn outstanding(&self) -> Vec<ConflictRecord> {
        self.plan
            .conflicts()
            .iter()
            .filter(|c| !self.resolved.contains_key(&c.entry_id))
            .cloned()
            .collect()
    }
}

/// Orchestrates whole-vault sync between the local entry store and a remote.
///
/// Only one cycle runs at a time; a second caller gets
/// [`VaultError::SyncInProgress`].
pub struct SyncEngine {
    gate: Arc<AuthGate>,
    entries: Arc<dyn EntryStore>,
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn SecureStore>,
    config: RwLock<SyncConfig>,
    config_path: Option<PathBuf>,
    resolver: ConflictResolver,
    cycle: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingMerge>>,
    progress: watch::Sender<SyncProgress>,
    history: Mutex<SyncHistory>,
    cancel: Mutex<CancellationToken>,
}

impl SyncEngine {
    /// Create a new sync engine over the given collaborators.
    pub fn new(
        gate: Arc<AuthGate>,
        entries: Arc<dyn EntryStore>,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn SecureStore>,
        config: SyncConfig,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            gate,
            entries,
            remote,
            store,
            config: RwLock::new(config),
            config_path: None,
            resolver: ConflictResolver::with_field_union(),
            cycle: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            progress,
            history: Mutex::new(SyncHistory::default()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Persist last-sync fields to this TOML file after each cycle
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Resolver used for `Merge` strategies
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: SyncConfig) {
        *self.config.write() = config;
    }

    pub fn is_unlocked(&self) -> bool {
        self.gate.is_unlocked()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Cancel the running cycle, if any
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Finished sessions, newest first
    pub fn history(&self) -> Vec<SyncSession> {
        self.history.lock().recent()
    }

    /// Conflicts still waiting for a resolution
    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.pending
            .lock()
            .as_ref()
            .map(PendingMerge::outstanding)
            .unwrap_or_default()
    }

    /// Time of the last completed sync, from the secure store
    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.store.read_string(StoreKey::LastSyncAt)? {
            Some(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| VaultError::Storage(format!("Corrupt last-sync timestamp: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn test_connection(&self) -> ConnectionResult {
        let timeout = self.config.read().timeout();
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.remote.test_connection()).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(timeout.as_secs()).into()),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ConnectionResult {
                success: true,
                message: "Connected".to_string(),
                latency_ms,
            },
            Err(e) => ConnectionResult {
                success: false,
                message: e.to_string(),
                latency_ms,
            },
        }
    }

    /// Run a sync cycle in the direction the configured mode allows.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let mode = self.config.read().mode;
        match mode {
            SyncMode::UploadOnly => return self.sync_upload().await.map(SyncOutcome::Completed),
            SyncMode::DownloadOnly => {
                return self.sync_download().await.map(SyncOutcome::Completed)
            }
            SyncMode::Auto | SyncMode::Manual => {}
        }

        let (_guard, token) = self.begin()?;
        let key = self.gate.session_key()?;

        let mut session = SyncSession::start();
        let outcome = match self.resume_pending(&key, &token).await {
            Ok(Some(pending)) if pending.outstanding().is_empty() => {
                return self
                    .complete_pending(&key, &token, pending)
                    .await
                    .map(SyncOutcome::Completed);
            }
            Ok(Some(pending)) => {
                let outstanding = pending.outstanding();
                *self.pending.lock() = Some(pending);
                Ok(SyncOutcome::Conflicted(outstanding))
            }
            Ok(None) => self.run_two_way(&key, &token, &mut session).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(SyncOutcome::Completed(result)) => self.record_success(session, result),
            Ok(SyncOutcome::Conflicted(conflicts)) => {
                info!("Sync paused on {} conflict(s)", conflicts.len());
                self.update_config_status(SyncStatus::Conflicted, None);
            }
            Err(e) => self.record_failure(session, e),
        }
        outcome
    }

    /// Push local state, replacing whatever the remote holds.
    pub async fn sync_upload(&self) -> Result<SyncResult> {
        let (_guard, token) = self.begin()?;
        let key = self.gate.session_key()?;
        let mut session = SyncSession::start();

        let result = async {
            let local = self.entries.load_all(&key)?;
            let plan = MergePlan::take_local(local);
            self.apply(&key, &token, &mut session, &plan, &[], None, None)
                .await
        }
        .await;

        self.conclude(session, result)
    }

    /// Replace local state with the remote vault.
    pub async fn sync_download(&self) -> Result<SyncResult> {
        let (_guard, token) = self.begin()?;
        let key = self.gate.session_key()?;
        let mut session = SyncSession::start();

        let result = async {
            let local = self.entries.load_all(&key)?;
            let seen_remote = self.step(&token, self.remote.fetch_checksum()).await?;
            self.publish(session.advance(SyncStatus::Downloading, 0.2));
            let remote = self
                .fetch_remote_entries(&key, &token)
                .await?
                .ok_or_else(|| {
                    VaultError::Configuration(
                        "No vault has been uploaded to the remote yet".to_string(),
                    )
                })?;
            let plan = MergePlan::take_remote(local, remote);
            self.apply(&key, &token, &mut session, &plan, &[], seen_remote, None)
                .await
        }
        .await;

        self.conclude(session, result)
    }

    /// Resolve one pending conflict.
    ///
    /// Once the last conflict is resolved the paused cycle is finished and
    /// `Completed` is returned; until then the remaining conflicts are.
    pub async fn resolve_conflict(
        &self,
        entry_id: Uuid,
        strategy: Resolution,
    ) -> Result<SyncOutcome> {
        let (_guard, token) = self.begin()?;
        let key = self.gate.session_key()?;
        let mut pending = self.take_pending()?;

        let conflict = match pending
            .outstanding()
            .into_iter()
            .find(|c| c.entry_id == entry_id)
        {
            Some(conflict) => conflict,
            None => {
                *self.pending.lock() = Some(pending);
                return Err(VaultError::Conflict(format!(
                    "No pending conflict for entry {}",
                    entry_id
                )));
            }
        };

        match self.resolver.resolve(&conflict, strategy) {
            Ok(resolved) => {
                debug!("Resolved {} with {}", entry_id, strategy.as_str());
                pending.resolved.insert(entry_id, resolved);
            }
            Err(e) => {
                *self.pending.lock() = Some(pending);
                return Err(e);
            }
        }

        let remaining = pending.outstanding();
        if !remaining.is_empty() {
            *self.pending.lock() = Some(pending);
            return Ok(SyncOutcome::Conflicted(remaining));
        }

        self.complete_pending(&key, &token, pending)
            .await
            .map(SyncOutcome::Completed)
    }

    /// Resolve every pending conflict at once and finish the cycle.
    ///
    /// All-or-nothing: a missing strategy or failing merge leaves every
    /// conflict pending.
    pub async fn resolve_all_conflicts(
        &self,
        strategies: &HashMap<Uuid, Resolution>,
    ) -> Result<SyncResult> {
        let (_guard, token) = self.begin()?;
        let key = self.gate.session_key()?;
        let mut pending = self.take_pending()?;

        match self.resolver.resolve_all(&pending.outstanding(), strategies) {
            Ok(resolved) => {
                for entry in resolved {
                    pending.resolved.insert(entry.entry_id(), entry);
                }
            }
            Err(e) => {
                *self.pending.lock() = Some(pending);
                return Err(e);
            }
        }

        self.complete_pending(&key, &token, pending).await
    }

    /// Take the paused plan if neither side changed since it was built.
    ///
    /// A stale plan is dropped along with its resolutions.
    async fn resume_pending(
        &self,
        key: &SessionKey,
        token: &CancellationToken,
    ) -> Result<Option<PendingMerge>> {
        let seen = self
            .pending
            .lock()
            .as_ref()
            .map(|p| (p.seen_local.clone(), p.seen_remote.clone()));
        let Some((seen_local, seen_remote)) = seen else {
            return Ok(None);
        };

        let local = SyncSnapshot::from_entries(&self.entries.load_all(key)?).checksum;
        let remote = self.step(token, self.remote.fetch_checksum()).await?;

        let Some(pending) = self.pending.lock().take() else {
            return Ok(None);
        };
        if local == seen_local && remote == seen_remote {
            debug!(
                "Resuming paused sync, {} of {} conflict(s) resolved",
                pending.resolved.len(),
                pending.plan.conflicts().len()
            );
            return Ok(Some(pending));
        }

        warn!(
            "Vault changed while sync was paused, discarding {} conflict resolution(s)",
            pending.resolved.len()
        );
        Ok(None)
    }

    async fn run_two_way(
        &self,
        key: &SessionKey,
        token: &CancellationToken,
        session: &mut SyncSession,
    ) -> Result<SyncOutcome> {
        self.publish(session.advance(SyncStatus::Checking, 0.05));

        let local = self.entries.load_all(key)?;
        let local_checksum = SyncSnapshot::from_entries(&local).checksum;
        let seen_remote = self.step(token, self.remote.fetch_checksum()).await?;

        if seen_remote.as_deref() == Some(local_checksum.as_str()) {
            debug!("Remote checksum matches local state, nothing to do");
            self.mark_synced()?;
            return Ok(SyncOutcome::Completed(SyncResult {
                counts: Default::default(),
                checksum: local_checksum,
                completed_at: Utc::now(),
                skipped: Vec::new(),
            }));
        }

        // A missing checksum may hide a payload from an interrupted upload
        self.publish(session.advance(SyncStatus::Downloading, 0.2));
        let remote = self
            .fetch_remote_entries(key, token)
            .await?
            .unwrap_or_default();

        self.publish(session.advance(SyncStatus::Merging, 0.5));
        let plan = MergePlan::build(local, remote, self.last_sync_at()?);

        if plan.has_conflicts() {
            let conflicts = plan.conflicts().to_vec();
            session.conflicts = conflicts.len();
            self.publish(session.advance(SyncStatus::Conflicted, 0.5));
            *self.pending.lock() = Some(PendingMerge {
                plan,
                seen_local: local_checksum,
                seen_remote,
                resolved: HashMap::new(),
                session: session.clone(),
            });
            return Ok(SyncOutcome::Conflicted(conflicts));
        }

        self.apply(key, token, session, &plan, &[], seen_remote, None)
            .await
            .map(SyncOutcome::Completed)
    }

    async fn complete_pending(
        &self,
        key: &SessionKey,
        token: &CancellationToken,
        pending: PendingMerge,
    ) -> Result<SyncResult> {
        let mut session = pending.session.clone();
        self.publish(session.advance(SyncStatus::Resolving, 0.6));

        let resolved: Vec<ResolvedEntry> = pending.resolved.values().cloned().collect();
        let result = self
            .apply(
                key,
                token,
                &mut session,
                &pending.plan,
                &resolved,
                pending.seen_remote.clone(),
                Some(pending.seen_remote.clone()),
            )
            .await;

        // Transient failures keep the resolutions for a retry
        if matches!(result, Err(VaultError::Network(_)) | Err(VaultError::Cancelled)) {
            *self.pending.lock() = Some(pending);
        }
        self.conclude(session, result)
    }

    /// Write the merged sets: remote first, then local.
    ///
    /// `recheck` carries the remote checksum a paused plan was built
    /// against; if the remote moved on since, the plan is stale.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        key: &SessionKey,
        token: &CancellationToken,
        session: &mut SyncSession,
        plan: &MergePlan,
        resolved: &[ResolvedEntry],
        seen_remote: Option<String>,
        recheck: Option<Option<String>>,
    ) -> Result<SyncResult> {
        let merged = plan.finalize(resolved)?;
        let remote_checksum = SyncSnapshot::from_entries(&merged.remote).checksum;

        if let Some(expected) = recheck {
            let current = self.step(token, self.remote.fetch_checksum()).await?;
            if current != expected {
                return Err(VaultError::Conflict(
                    "Remote vault changed while conflicts were being resolved, sync again"
                        .to_string(),
                ));
            }
        }

        if seen_remote.as_deref() != Some(remote_checksum.as_str()) {
            self.publish(session.advance(SyncStatus::Uploading, 0.7));
            let compress = self.config.read().compress;
            let document = VaultPayload::new(merged.remote.clone());
            let bytes = payload::seal(key, &document, compress)?;
            self.step(token, self.remote.upload(bytes, &document.checksum))
                .await?;
            debug!("Uploaded {} entries", merged.remote.len());
        }

        if token.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        if merged.local_changed {
            self.publish(session.advance(SyncStatus::Merging, 0.9));
            self.entries.replace_all(key, &merged.local)?;
        }

        if merged.skipped.is_empty() {
            self.mark_synced()?;
        } else {
            info!(
                "{} conflict(s) skipped, they will be raised again next sync",
                merged.skipped.len()
            );
        }

        Ok(SyncResult {
            counts: merged.counts,
            checksum: remote_checksum,
            completed_at: Utc::now(),
            skipped: merged.skipped,
        })
    }

    async fn fetch_remote_entries(
        &self,
        key: &SessionKey,
        token: &CancellationToken,
    ) -> Result<Option<Vec<VaultEntry>>> {
        match self.step(token, self.remote.download()).await? {
            Some(bytes) => Ok(Some(payload::open(key, &bytes)?.entries)),
            None => Ok(None),
        }
    }

    /// Cancellation check plus timeout around one network step.
    async fn step<T>(
        &self,
        token: &CancellationToken,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if token.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let timeout = self.config.read().timeout();

        tokio::select! {
            _ = token.cancelled() => Err(VaultError::Cancelled),
            result = tokio::time::timeout(timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(NetworkError::Timeout(timeout.as_secs()).into()),
            },
        }
    }

    fn begin(&self) -> Result<(tokio::sync::MutexGuard<'_, ()>, CancellationToken)> {
        let guard = self
            .cycle
            .try_lock()
            .map_err(|_| VaultError::SyncInProgress)?;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        Ok((guard, token))
    }

    fn take_pending(&self) -> Result<PendingMerge> {
        self.pending
            .lock()
            .take()
            .ok_or_else(|| VaultError::Conflict("No conflicts are pending".to_string()))
    }

    fn publish(&self, progress: SyncProgress) {
        self.progress.send_replace(progress);
    }

    fn mark_synced(&self) -> Result<()> {
        self.store
            .write_string(StoreKey::LastSyncAt, &Utc::now().to_rfc3339())
    }

    fn conclude(&self, session: SyncSession, result: Result<SyncResult>) -> Result<SyncResult> {
        match &result {
            Ok(r) => self.record_success(session, r),
            Err(e) => self.record_failure(session, e),
        }
        result
    }

    fn record_success(&self, mut session: SyncSession, result: &SyncResult) {
        self.publish(session.succeed(result.counts));
        info!(
            "Sync complete: {} added, {} updated, {} deleted, {} uploaded",
            result.counts.added, result.counts.updated, result.counts.deleted, result.counts.uploaded
        );
        self.history.lock().record(session);
        self.update_config_status(SyncStatus::Success, Some(result.completed_at));
    }

    fn record_failure(&self, mut session: SyncSession, error: &VaultError) {
        self.publish(session.fail(error.to_string()));
        warn!("Sync failed: {}", error);
        self.history.lock().record(session);
        self.update_config_status(SyncStatus::Failure, None);
    }

    fn update_config_status(&self, status: SyncStatus, completed_at: Option<DateTime<Utc>>) {
        let snapshot = {
            let mut config = self.config.write();
            config.last_sync_status = Some(status);
            if completed_at.is_some() {
                config.last_sync_at = completed_at;
            }
            config.clone()
        };

        if let Some(path) = &self.config_path {
            if let Err(e) = snapshot.save(path) {
                warn!("Failed to save sync config to {:?}: {}", path, e);
            }
        }
    }
}
