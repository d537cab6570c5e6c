//! Unlock gate: owns the session key while the vault is unlocked.

use crate::auth::lockout::{LockoutPolicy, LockoutState};
use crate::crypto::cipher::base64_bytes;
use crate::crypto::kdf::SALT_LEN;
use crate::crypto::{
    derive_key_material, generate_salt, verify_hash, CryptoError, KdfParams, MasterKeyMaterial,
    SecureBuffer, SessionKey,
};
use crate::store::{SecureStore, StoreKey};
use crate::{Result, VaultError};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the gate is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// Gate opened over an existing vault, no unlock yet
    Startup,
    /// Explicit `lock()`
    Manual,
    WrongPassword,
    Lockout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoPasswordSet,
    Unlocked,
    Locked(LockReason),
}

/// Old and new keys after a password change.
///
/// Data encrypted under `previous` must be re-encrypted by the caller.
#[derive(Debug)]
pub struct KeyRotation {
    pub previous: SessionKey,
    pub current: SessionKey,
}

/// A verified password change that has not been stored yet.
///
/// The caller persists [`PasswordChange::credential_record`] under
/// [`StoreKey::Credential`], usually together with data re-encrypted under
/// `current`, then hands the change back to
/// [`AuthGate::complete_password_change`].
#[derive(Debug)]
pub struct PasswordChange {
    pub previous: SessionKey,
    pub current: SessionKey,
    record: Vec<u8>,
}

impl PasswordChange {
    pub fn credential_record(&self) -> &[u8] {
        &self.record
    }
}

/// Snapshot of the failure counter for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    pub failed_attempts: u32,
    pub remaining_secs: Option<i64>,
}

/// Everything needed to check a password, stored as one slot so it is
/// replaced in a single write.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    #[serde(with = "base64_bytes")]
    salt: [u8; SALT_LEN],
    #[serde(with = "base64_bytes")]
    verification_hash: Vec<u8>,
    params: KdfParams,
}

impl StoredCredential {
    fn encode(material: &MasterKeyMaterial) -> Result<Vec<u8>> {
        let record = StoredCredential {
            salt: material.salt,
            verification_hash: material.verification_hash.to_vec(),
            params: material.params.clone(),
        };
        Ok(serde_json::to_vec(&record)?)
    }
}

/// Master password gate.
///
/// Attempt bookkeeping and `lock` are serialized by an async mutex, so
/// concurrent `verify_master_password` calls cannot lose a failure count and
/// an in-flight unlock cannot outlive a `lock()`.
pub struct AuthGate {
    store: Arc<dyn SecureStore>,
    params: KdfParams,
    policy: LockoutPolicy,
    state: RwLock<AuthState>,
    session: RwLock<Option<SessionKey>>,
    attempts: tokio::sync::Mutex<()>,
}

impl AuthGate {
    /// Open a gate over `store` with default KDF parameters and policy
    pub fn new(store: Arc<dyn SecureStore>) -> Result<Self> {
        let initial = if store.read(StoreKey::Credential)?.is_some() {
            AuthState::Locked(LockReason::Startup)
        } else {
            AuthState::NoPasswordSet
        };

        Ok(Self {
            store,
            params: KdfParams::default(),
            policy: LockoutPolicy::default(),
            state: RwLock::new(initial),
            session: RwLock::new(None),
            attempts: tokio::sync::Mutex::new(()),
        })
    }

    /// Parameters used for new derivations (setup and password change).
    ///
    /// Existing vaults keep unlocking with the parameters stored at setup.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> AuthState {
        *self.state.read()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == AuthState::Unlocked
    }

    pub fn is_password_set(&self) -> Result<bool> {
        Ok(self.store.read(StoreKey::Credential)?.is_some())
    }

    /// Clone of the held session key
    pub fn session_key(&self) -> Result<SessionKey> {
        self.session.read().clone().ok_or(VaultError::Locked)
    }

    pub fn lockout_status(&self) -> Result<LockoutStatus> {
        let lockout = LockoutState::load(self.store.as_ref())?;
        Ok(LockoutStatus {
            failed_attempts: lockout.failed_attempts,
            remaining_secs: lockout.remaining(Utc::now()).map(|d| d.num_seconds()),
        })
    }

    /// Set the first master password and unlock.
    pub async fn setup_master_password(&self, password: &[u8]) -> Result<()> {
        let _guard = self.attempts.lock().await;

        if self.is_password_set()? {
            return Err(VaultError::AlreadyInitialized);
        }

        let salt = generate_salt()?;
        let material = derive(password, salt, self.params.clone()).await?;
        self.store
            .write(StoreKey::Credential, &StoredCredential::encode(&material)?)?;
        LockoutState::default().save(self.store.as_ref())?;

        self.unlock_with(material.into_key());
        info!("Master password set");
        Ok(())
    }

    /// Check a candidate master password.
    ///
    /// Returns `Ok(false)` for a wrong password and `Err(Lockout)` while a
    /// lock is armed, even if the password would have been correct.
    pub async fn verify_master_password(&self, password: &[u8]) -> Result<bool> {
        let _guard = self.attempts.lock().await;

        match self.check_password(password).await? {
            Some(material) => {
                self.unlock_with(material.into_key());
                info!("Vault unlocked");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the master password and store the new credential.
    ///
    /// A wrong `old` password counts as a failed attempt and returns
    /// `Err(Authentication)`. Data encrypted under the old key is left to
    /// the caller; use [`Self::prepare_password_change`] when it must be
    /// re-encrypted in the same commit as the credential.
    pub async fn change_password(&self, old: &[u8], new: &[u8]) -> Result<KeyRotation> {
        let change = self.prepare_password_change(old, new).await?;
        self.store
            .write(StoreKey::Credential, change.credential_record())?;
        self.complete_password_change(change).await
    }

    /// Check `old` and derive the key for `new` without writing anything
    pub async fn prepare_password_change(&self, old: &[u8], new: &[u8]) -> Result<PasswordChange> {
        let _guard = self.attempts.lock().await;

        let previous = match self.check_password(old).await? {
            Some(material) => material.into_key(),
            None => return Err(VaultError::Authentication),
        };

        let salt = generate_salt()?;
        let material = derive(new, salt, self.params.clone()).await?;
        let record = StoredCredential::encode(&material)?;

        Ok(PasswordChange {
            previous,
            current: material.into_key(),
            record,
        })
    }

    /// Switch the session to the new key once its credential is stored.
    ///
    /// Fails with `Storage` if the stored credential is not the one in
    /// `change`; the session is left untouched in that case.
    pub async fn complete_password_change(&self, change: PasswordChange) -> Result<KeyRotation> {
        let _guard = self.attempts.lock().await;

        if self.store.read(StoreKey::Credential)?.as_deref() != Some(change.credential_record()) {
            return Err(VaultError::Storage(
                "New credential was not stored".to_string(),
            ));
        }

        self.unlock_with(change.current.clone());
        info!("Master password changed");

        Ok(KeyRotation {
            previous: change.previous,
            current: change.current,
        })
    }

    /// Drop the session key and lock.
    ///
    /// Waits for an in-flight unlock attempt, so the gate is locked when this
    /// returns.
    pub async fn lock(&self) {
        let _guard = self.attempts.lock().await;

        *self.session.write() = None;
        let mut state = self.state.write();
        if *state != AuthState::NoPasswordSet {
            *state = AuthState::Locked(LockReason::Manual);
        }
        info!("Vault locked");
    }

    /// Shared lockout check, derivation and counter update.
    /// Callers must hold `attempts`.
    async fn check_password(&self, password: &[u8]) -> Result<Option<MasterKeyMaterial>> {
        let stored = self.load_credential()?;
        let mut lockout = LockoutState::load(self.store.as_ref())?;

        if let Some(remaining) = lockout.remaining(Utc::now()) {
            self.set_locked(LockReason::Lockout);
            return Err(VaultError::Lockout {
                remaining_secs: remaining.num_seconds(),
            });
        }

        let material = derive(password, stored.salt, stored.params).await?;

        if verify_hash(&material.verification_hash, &stored.verification_hash) {
            if lockout.failed_attempts > 0 {
                debug!("Clearing {} failed attempt(s)", lockout.failed_attempts);
            }
            lockout.reset();
            lockout.save(self.store.as_ref())?;
            return Ok(Some(material));
        }

        let armed = lockout.record_failure(Utc::now(), &self.policy);
        lockout.save(self.store.as_ref())?;

        match armed {
            Some(duration) => {
                warn!(
                    "Master password rejected ({} failures), locked for {} minute(s)",
                    lockout.failed_attempts,
                    duration.num_minutes()
                );
                self.set_locked(LockReason::Lockout);
            }
            None => {
                warn!(
                    "Master password rejected ({} failures)",
                    lockout.failed_attempts
                );
                self.set_locked(LockReason::WrongPassword);
            }
        }
        Ok(None)
    }

    fn unlock_with(&self, key: SessionKey) {
        *self.session.write() = Some(key);
        *self.state.write() = AuthState::Unlocked;
    }

    fn set_locked(&self, reason: LockReason) {
        *self.session.write() = None;
        *self.state.write() = AuthState::Locked(reason);
    }

    fn load_credential(&self) -> Result<StoredCredential> {
        let record = self
            .store
            .read(StoreKey::Credential)?
            .ok_or(VaultError::NotInitialized)?;
        Ok(serde_json::from_slice(&record)?)
    }
}

/// Run Argon2id off the async runtime
async fn derive(
    password: &[u8],
    salt: [u8; SALT_LEN],
    params: KdfParams,
) -> Result<MasterKeyMaterial> {
    let password = SecureBuffer::new(password.to_vec());
    let material = tokio::task::spawn_blocking(move || {
        derive_key_material(password.as_bytes(), &salt, &params)
    })
    .await
    .map_err(|e| CryptoError::KdfFailed(format!("KDF task failed: {}", e)))??;
    Ok(material)
}
