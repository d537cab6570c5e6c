//! Failed attempt lockout mechanism to prevent brute force attacks.
//!
//! Failures are counted cumulatively. Crossing a tier threshold arms a
//! lock until `now + duration`; only a successful unlock clears the counter.

use crate::store::{SecureStore, StoreKey};
use crate::{Result, VaultError};
use chrono::{DateTime, Duration, Utc};

/// Failures before the first lock
pub const DEFAULT_FIRST_THRESHOLD: u32 = 5;

/// Failures before the long lock
pub const DEFAULT_SECOND_THRESHOLD: u32 = 10;

/// Lockout configuration
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// `(failed_attempts, lock duration)` pairs, ascending by attempts
    pub tiers: Vec<(u32, Duration)>,
    /// Whether to enable lockout
    pub enabled: bool,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                (DEFAULT_FIRST_THRESHOLD, Duration::minutes(5)),
                (DEFAULT_SECOND_THRESHOLD, Duration::minutes(30)),
            ],
            enabled: true,
        }
    }
}

impl LockoutPolicy {
    /// Lock duration armed by reaching `failed_attempts`.
    ///
    /// Exact tier thresholds arm their tier. Past the last threshold every
    /// further failure re-arms the last tier.
    pub fn lockout_duration(&self, failed_attempts: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }

        if let Some((_, duration)) = self.tiers.iter().find(|(at, _)| *at == failed_attempts) {
            return Some(*duration);
        }

        match self.tiers.last() {
            Some((last, duration)) if failed_attempts > *last => Some(*duration),
            _ => None,
        }
    }
}

/// Persisted failure counter and lock deadline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Load the state from the secure store. Missing slots mean "no failures".
    pub fn load(store: &dyn SecureStore) -> Result<Self> {
        let failed_attempts = match store.read_string(StoreKey::FailedAttempts)? {
            Some(s) => s.trim().parse().map_err(|_| {
                VaultError::Storage(format!("Corrupt failed-attempt counter: {}", s))
            })?,
            None => 0,
        };

        let locked_until = match store.read_string(StoreKey::LockedUntil)? {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s.trim())
                    .map_err(|e| VaultError::Storage(format!("Corrupt lockout deadline: {}", e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            failed_attempts,
            locked_until,
        })
    }

    /// Write the state back to the secure store
    pub fn save(&self, store: &dyn SecureStore) -> Result<()> {
        if self.failed_attempts == 0 {
            store.delete(StoreKey::FailedAttempts)?;
        } else {
            store.write_string(StoreKey::FailedAttempts, &self.failed_attempts.to_string())?;
        }

        match self.locked_until {
            Some(until) => store.write_string(StoreKey::LockedUntil, &until.to_rfc3339())?,
            None => store.delete(StoreKey::LockedUntil)?,
        }
        Ok(())
    }

    /// Count a failure and arm a lock if a threshold is crossed.
    ///
    /// Returns the armed duration, if any.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &LockoutPolicy) -> Option<Duration> {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let duration = policy.lockout_duration(self.failed_attempts)?;
        self.locked_until = Some(now + duration);
        Some(duration)
    }

    /// Remaining lock time, or `None` when not locked
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.locked_until?;
        let remaining = until - now;
        (remaining > Duration::zero()).then_some(remaining)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some()
    }

    /// Clear all failures (after a successful unlock)
    pub fn reset(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_lockout_policy_default() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.tiers.len(), 2);
        assert!(policy.enabled);
    }

    #[test]
    fn test_lockout_duration_tiers() {
        let policy = LockoutPolicy::default();

        // No lockout below the first threshold
        for attempts in 0..5 {
            assert!(policy.lockout_duration(attempts).is_none());
        }

        assert_eq!(policy.lockout_duration(5), Some(Duration::minutes(5)));

        // Between tiers the existing lock is left alone
        for attempts in 6..10 {
            assert!(policy.lockout_duration(attempts).is_none());
        }

        assert_eq!(policy.lockout_duration(10), Some(Duration::minutes(30)));
        assert_eq!(policy.lockout_duration(11), Some(Duration::minutes(30)));
        assert_eq!(policy.lockout_duration(50), Some(Duration::minutes(30)));
    }

    #[test]
    fn test_disabled_policy_never_locks() {
        let policy = LockoutPolicy {
            enabled: false,
            ..LockoutPolicy::default()
        };
        assert!(policy.lockout_duration(5).is_none());
        assert!(policy.lockout_duration(10).is_none());
    }

    #[test]
    fn test_record_failure_arms_lock() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let mut state = LockoutState::default();

        for _ in 0..4 {
            assert!(state.record_failure(now, &policy).is_none());
        }
        assert!(!state.is_locked(now));

        assert_eq!(state.record_failure(now, &policy), Some(Duration::minutes(5)));
        assert_eq!(state.failed_attempts, 5);
        assert!(state.is_locked(now));
        assert_eq!(state.remaining(now), Some(Duration::minutes(5)));

        // Expiry does not reset the counter
        let later = now + Duration::minutes(6);
        assert!(!state.is_locked(later));
        assert_eq!(state.failed_attempts, 5);
    }

    #[test]
    fn test_reset() {
        let mut state = LockoutState {
            failed_attempts: 7,
            locked_until: Some(Utc::now()),
        };
        state.reset();
        assert_eq!(state, LockoutState::default());
    }

    #[test]
    fn test_load_save_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(LockoutState::load(&store).unwrap(), LockoutState::default());

        let until = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let state = LockoutState {
            failed_attempts: 10,
            locked_until: Some(until),
        };
        state.save(&store).unwrap();
        assert_eq!(LockoutState::load(&store).unwrap(), state);

        LockoutState::default().save(&store).unwrap();
        assert_eq!(store.read(StoreKey::FailedAttempts).unwrap(), None);
        assert_eq!(store.read(StoreKey::LockedUntil).unwrap(), None);
    }

    #[test]
    fn test_corrupt_counter_is_storage_error() {
        let store = MemoryStore::new();
        store.write_string(StoreKey::FailedAttempts, "many").unwrap();
        assert!(matches!(
            LockoutState::load(&store),
            Err(VaultError::Storage(_))
        ));
    }
}
