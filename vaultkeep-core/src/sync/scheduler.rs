//! Background auto-sync on a fixed interval.

use crate::sync::engine::SyncEngine;
use crate::sync::models::SyncOutcome;
use crate::{Result, VaultError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running auto-sync task. Dropping it does not stop the task;
/// call [`AutoSync::stop`].
pub struct AutoSync {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoSync {
    /// Spawn the loop using the engine's configured interval.
    ///
    /// Each tick re-reads the config, so disabling auto-sync takes effect
    /// without restarting the task.
    pub fn start(engine: Arc<SyncEngine>) -> Self {
        let token = CancellationToken::new();
        let period = engine.config().interval();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.tick().await; // Skip first tick

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let _ = run_once(&engine).await;
            }
            debug!("Auto-sync stopped");
        });

        info!("Auto-sync every {:?}", period);
        Self { token, handle }
    }

    /// Stop the loop and wait for it to exit. A running cycle is cancelled.
    pub async fn stop(self, engine: &SyncEngine) {
        self.token.cancel();
        engine.cancel();
        if let Err(e) = self.handle.await {
            warn!("Auto-sync task ended abnormally: {}", e);
        }
    }
}

/// One scheduler tick. `None` when the tick was skipped.
pub async fn run_once(engine: &SyncEngine) -> Option<Result<SyncOutcome>> {
    if !engine.config().auto_sync_active() {
        return None;
    }
    if !engine.is_unlocked() {
        debug!("Vault is locked, skipping auto-sync");
        return None;
    }

    let result = engine.sync().await;
    match &result {
        Ok(SyncOutcome::Completed(r)) if r.is_noop() => debug!("Auto-sync: up to date"),
        Ok(SyncOutcome::Completed(_)) => {}
        Ok(SyncOutcome::Conflicted(conflicts)) => warn!(
            "Auto-sync paused on {} conflict(s), resolve them manually",
            conflicts.len()
        ),
        Err(VaultError::SyncInProgress) => debug!("Auto-sync skipped, a sync is already running"),
        Err(e) => warn!("Auto-sync failed: {}", e),
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthGate;
    use crate::crypto::KdfParams;
    use crate::entry::{EntryPayload, VaultEntry};
    use crate::store::{MemoryEntryStore, MemoryStore};
    use crate::sync::config::{SyncConfig, SyncMode};
    use crate::sync::remote::MemoryRemote;
    use std::time::Duration;

    async fn engine(config: SyncConfig) -> (Arc<SyncEngine>, Arc<AuthGate>, Arc<MemoryRemote>) {
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(
            AuthGate::new(store.clone())
                .unwrap()
                .with_kdf_params(KdfParams::for_tests()),
        );
        gate.setup_master_password(b"pw").await.unwrap();

        let entries = Arc::new(MemoryEntryStore::new());
        entries.upsert(VaultEntry::new(EntryPayload::SecureNote {
            title: "note".to_string(),
            body: String::new(),
        }));
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(gate.clone(), entries, remote.clone(), store, config);
        (Arc::new(engine), gate, remote)
    }

    fn auto_config() -> SyncConfig {
        SyncConfig {
            enabled: true,
            mode: SyncMode::Auto,
            auto_sync_interval_minutes: 1,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn skipped_unless_auto_and_enabled() {
        let (engine, _, remote) = engine(SyncConfig::default()).await;
        assert!(run_once(&engine).await.is_none());

        engine.set_config(SyncConfig {
            enabled: true,
            ..SyncConfig::default()
        });
        assert!(run_once(&engine).await.is_none());
        assert_eq!(remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn skipped_while_locked() {
        let (engine, gate, remote) = engine(auto_config()).await;
        gate.lock().await;
        assert!(run_once(&engine).await.is_none());
        assert_eq!(remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn runs_when_active() {
        let (engine, _, remote) = engine(auto_config()).await;
        let result = run_once(&engine).await.unwrap().unwrap();
        assert!(matches!(result, SyncOutcome::Completed(_)));
        assert_eq!(remote.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_fires_on_interval_and_stops() {
        let (engine, _, remote) = engine(auto_config()).await;
        let auto = AutoSync::start(engine.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.upload_count(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.upload_count(), 1);

        auto.stop(&engine).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(remote.upload_count(), 1);
    }
}
