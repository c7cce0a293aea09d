use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::KeyValueStore;

/// Fixed key of the singleton lockout record.
pub const LOCKOUT_STATE_KEY: &str = "pin_lock_state";

/// Escalating lock schedule: an ordered table of `(threshold, duration)` pairs.
///
/// After a failure, the lock applied is the duration of the highest threshold
/// the new failure count has reached. Counts below the first threshold apply no
/// lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    tiers: Vec<(u32, Duration)>,
}

impl LockoutPolicy {
    pub fn new(tiers: Vec<(u32, Duration)>) -> WalletResult<Self> {
        for (index, (threshold, duration)) in tiers.iter().enumerate() {
            if *threshold == 0 {
                return Err(WalletError::ValidationError(
                    "Lockout thresholds must be positive".to_string(),
                ));
            }
            if duration.is_zero() {
                return Err(WalletError::ValidationError(
                    "Lockout durations must be non-zero".to_string(),
                ));
            }
            if let Some((previous_threshold, previous_duration)) =
                index.checked_sub(1).map(|i| tiers[i])
            {
                if *threshold <= previous_threshold || *duration < previous_duration {
                    return Err(WalletError::ValidationError(
                        "Lockout tiers must escalate monotonically".to_string(),
                    ));
                }
            }
        }

        Ok(Self { tiers })
    }

    /// Lock to apply once `failed_attempts` failures have been recorded.
    pub fn lock_duration_for(&self, failed_attempts: u32) -> Option<Duration> {
        self.tiers
            .iter()
            .rev()
            .find(|(threshold, _)| failed_attempts >= *threshold)
            .map(|(_, duration)| *duration)
    }

    pub fn tiers(&self) -> &[(u32, Duration)] {
        &self.tiers
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                (3, Duration::from_secs(30)),
                (6, Duration::from_secs(5 * 60)),
                (9, Duration::from_secs(30 * 60)),
            ],
        }
    }
}

/// Persisted lockout counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    pub remaining_seconds: u64,
}

impl LockStatus {
    const OPEN: Self = Self {
        locked: false,
        remaining_seconds: 0,
    };
}

/// Tracks failed PIN attempts and the lock windows they trigger.
#[derive(Debug, Clone)]
pub struct LockoutTracker {
    store: Arc<dyn KeyValueStore>,
    policy: LockoutPolicy,
    guard: Arc<Mutex<()>>,
}

impl LockoutTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: LockoutPolicy) -> Self {
        Self {
            store,
            policy,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_defaults(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, LockoutPolicy::default())
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Current lock status. An expired lock is cleared here; the attempt
    /// counter is left as it was.
    pub fn is_locked(&self) -> WalletResult<LockStatus> {
        let _guard = self.guard.lock();
        let mut state = self.read_state()?;

        let Some(locked_until) = state.locked_until else {
            return Ok(LockStatus::OPEN);
        };

        let now = Utc::now();
        if now >= locked_until {
            state.locked_until = None;
            self.write_state(&state)?;
            log::info!(
                "PIN lock expired with {} failed attempts on record",
                state.failed_attempts
            );
            return Ok(LockStatus::OPEN);
        }

        let remaining_millis = (locked_until - now).num_milliseconds().max(0) as u64;
        Ok(LockStatus {
            locked: true,
            remaining_seconds: remaining_millis.div_ceil(1000).max(1),
        })
    }

    /// Fail with [`WalletError::Locked`] while a lock window is active.
    pub fn ensure_unlocked(&self) -> WalletResult<()> {
        let status = self.is_locked()?;
        if status.locked {
            return Err(WalletError::Locked {
                remaining_seconds: status.remaining_seconds,
            });
        }
        Ok(())
    }

    /// Count a failed verification and arm the lock the policy prescribes.
    pub fn record_failed_attempt(&self) -> WalletResult<LockoutState> {
        let _guard = self.guard.lock();
        let mut state = self.read_state()?;
        state.failed_attempts = state.failed_attempts.saturating_add(1);

        if let Some(duration) = self.policy.lock_duration_for(state.failed_attempts) {
            let lock = chrono::Duration::from_std(duration).map_err(|_| {
                WalletError::ValidationError("Lock duration out of range".to_string())
            })?;
            state.locked_until = Some(Utc::now() + lock);
            log::warn!(
                "Failed PIN attempt {}; locked for {} seconds",
                state.failed_attempts,
                duration.as_secs()
            );
        } else {
            log::warn!("Failed PIN attempt {}", state.failed_attempts);
        }

        self.write_state(&state)?;
        Ok(state)
    }

    /// Clear the counter and any lock. Called after a successful verification.
    pub fn reset_failed_attempts(&self) -> WalletResult<()> {
        let _guard = self.guard.lock();
        self.write_state(&LockoutState::default())
    }

    pub fn get_failed_attempts(&self) -> WalletResult<u32> {
        let _guard = self.guard.lock();
        Ok(self.read_state()?.failed_attempts)
    }

    /// Raw persisted state, without expiring anything.
    pub fn state(&self) -> WalletResult<LockoutState> {
        let _guard = self.guard.lock();
        self.read_state()
    }

    fn read_state(&self) -> WalletResult<LockoutState> {
        match self.store.get(LOCKOUT_STATE_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(LockoutState::default()),
        }
    }

    fn write_state(&self, state: &LockoutState) -> WalletResult<()> {
        let serialized = serde_json::to_vec(state)?;
        self.store.put(LOCKOUT_STATE_KEY, &serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    fn tracker() -> LockoutTracker {
        LockoutTracker::with_defaults(Arc::new(MemoryStore::new()))
    }

    fn fail(tracker: &LockoutTracker, times: u32) -> LockoutState {
        let mut state = LockoutState::default();
        for _ in 0..times {
            state = tracker.record_failed_attempt().unwrap();
        }
        state
    }

    fn assert_remaining_near(status: LockStatus, expected: u64) {
        assert!(status.locked);
        assert!(
            status.remaining_seconds <= expected && status.remaining_seconds + 1 >= expected,
            "expected about {expected}s, got {}s",
            status.remaining_seconds
        );
    }

    #[test]
    fn default_policy_table() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.lock_duration_for(0), None);
        assert_eq!(policy.lock_duration_for(2), None);
        assert_eq!(policy.lock_duration_for(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.lock_duration_for(5), Some(Duration::from_secs(30)));
        assert_eq!(policy.lock_duration_for(6), Some(Duration::from_secs(300)));
        assert_eq!(policy.lock_duration_for(9), Some(Duration::from_secs(1800)));
        assert_eq!(policy.lock_duration_for(40), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn policy_rejects_non_monotonic_tiers() {
        let shrinking = LockoutPolicy::new(vec![
            (3, Duration::from_secs(60)),
            (6, Duration::from_secs(30)),
        ]);
        assert!(matches!(shrinking, Err(WalletError::ValidationError(_))));

        let repeated = LockoutPolicy::new(vec![
            (3, Duration::from_secs(30)),
            (3, Duration::from_secs(60)),
        ]);
        assert!(repeated.is_err());

        assert!(LockoutPolicy::new(vec![(0, Duration::from_secs(1))]).is_err());
        assert!(LockoutPolicy::new(vec![(1, Duration::ZERO)]).is_err());
        assert!(LockoutPolicy::new(Vec::new()).is_ok());
    }

    #[test]
    fn two_failures_do_not_lock() {
        let tracker = tracker();
        let state = fail(&tracker, 2);
        assert_eq!(state.failed_attempts, 2);
        assert_eq!(state.locked_until, None);
        assert_eq!(tracker.is_locked().unwrap(), LockStatus::OPEN);
    }

    #[test]
    fn third_failure_locks_for_thirty_seconds() {
        let tracker = tracker();
        let state = fail(&tracker, 3);
        assert!(state.locked_until.is_some());
        assert_remaining_near(tracker.is_locked().unwrap(), 30);
    }

    #[test]
    fn sixth_failure_locks_for_five_minutes() {
        let tracker = tracker();
        fail(&tracker, 6);
        assert_remaining_near(tracker.is_locked().unwrap(), 300);
    }

    #[test]
    fn ninth_failure_locks_for_thirty_minutes() {
        let tracker = tracker();
        fail(&tracker, 9);
        assert_remaining_near(tracker.is_locked().unwrap(), 1800);
    }

    #[test]
    fn successful_verification_resets_everything() {
        let tracker = tracker();
        fail(&tracker, 7);
        tracker.reset_failed_attempts().unwrap();

        assert_eq!(tracker.state().unwrap(), LockoutState::default());
        assert_eq!(tracker.is_locked().unwrap(), LockStatus::OPEN);
    }

    #[test]
    fn ensure_unlocked_reports_remaining_seconds() {
        let tracker = tracker();
        fail(&tracker, 3);
        match tracker.ensure_unlocked() {
            Err(WalletError::Locked { remaining_seconds }) => {
                assert!((29..=30).contains(&remaining_seconds))
            }
            other => panic!("Expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn expiry_clears_lock_but_keeps_attempts() {
        let policy = LockoutPolicy::new(vec![(2, Duration::from_millis(40))]).unwrap();
        let tracker = LockoutTracker::new(Arc::new(MemoryStore::new()), policy);

        fail(&tracker, 2);
        assert!(tracker.is_locked().unwrap().locked);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(tracker.is_locked().unwrap(), LockStatus::OPEN);
        assert_eq!(tracker.get_failed_attempts().unwrap(), 2);
        assert_eq!(tracker.state().unwrap().locked_until, None);

        // Pressure persists: the next failure re-arms immediately.
        let state = tracker.record_failed_attempt().unwrap();
        assert_eq!(state.failed_attempts, 3);
        assert!(tracker.is_locked().unwrap().locked);
    }

    #[test]
    fn remaining_seconds_never_increases_between_queries() {
        let policy = LockoutPolicy::new(vec![(1, Duration::from_millis(2500))]).unwrap();
        let tracker = LockoutTracker::new(Arc::new(MemoryStore::new()), policy);
        fail(&tracker, 1);

        let first = tracker.is_locked().unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let second = tracker.is_locked().unwrap();
        assert_eq!(first.remaining_seconds, 3);
        assert!(second.remaining_seconds < first.remaining_seconds);
    }

    #[test]
    fn further_failures_rearm_current_tier() {
        let tracker = tracker();
        fail(&tracker, 4);
        assert_remaining_near(tracker.is_locked().unwrap(), 30);
        assert_eq!(tracker.get_failed_attempts().unwrap(), 4);
    }

    #[test]
    fn state_persists_across_trackers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        fail(&LockoutTracker::with_defaults(store.clone()), 3);

        let reopened = LockoutTracker::with_defaults(Arc::new(FileStore::new(dir.path()).unwrap()));
        assert_eq!(reopened.get_failed_attempts().unwrap(), 3);
        assert!(reopened.is_locked().unwrap().locked);
    }

    #[test]
    fn corrupt_state_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.put(LOCKOUT_STATE_KEY, b"{broken").unwrap();
        let tracker = LockoutTracker::with_defaults(store);

        assert!(matches!(
            tracker.is_locked(),
            Err(WalletError::StorageUnavailable(_))
        ));
        assert!(tracker.ensure_unlocked().is_err());
    }
}
