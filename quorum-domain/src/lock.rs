//! Global trading lock.
//!
//! A typed replacement for the "position open" flag. The lock only encodes
//! business rules (hold time, cooldown); mutual exclusion is provided by the
//! owner that wraps it in a mutex.

use chrono::{DateTime, Duration, Utc};

/// Outcome of a release request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRelease {
    /// Lock is now free
    Released,
    /// Minimum hold not yet elapsed; lock kept
    Deferred,
    /// Lock was not held
    NotHeld,
}

/// Flag plus timestamp gating new trading intents.
///
/// # Invariants
/// - `locked_at` is `Some` exactly when `locked` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalTradingLock {
    locked: bool,
    locked_at: Option<DateTime<Utc>>,
    min_hold: Duration,
    min_cooldown: Duration,
}

impl GlobalTradingLock {
    /// Create a free lock
    pub fn new(min_hold: Duration, min_cooldown: Duration) -> Self {
        Self {
            locked: false,
            locked_at: None,
            min_hold,
            min_cooldown,
        }
    }

    /// Whether the lock is held
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// When the lock was taken
    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    /// Minimum time the lock stays held after acquisition
    pub fn min_hold(&self) -> Duration {
        self.min_hold
    }

    /// Minimum time between a closed bracket and the next submission
    pub fn min_cooldown(&self) -> Duration {
        self.min_cooldown
    }

    /// Take the lock. Returns false if it was already held.
    pub fn acquire_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.locked {
            return false;
        }
        self.locked = true;
        self.locked_at = Some(now);
        true
    }

    /// Time the lock has been held
    pub fn held_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.locked_at.map(|at| now - at)
    }

    /// True when the lock is free or has been held for at least `min_hold`
    pub fn hold_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.held_for(now) {
            Some(held) => held >= self.min_hold,
            None => true,
        }
    }

    /// Release, honouring the minimum hold.
    pub fn release_at(&mut self, now: DateTime<Utc>) -> LockRelease {
        if !self.locked {
            return LockRelease::NotHeld;
        }
        if !self.hold_elapsed(now) {
            return LockRelease::Deferred;
        }
        self.force_release();
        LockRelease::Released
    }

    /// Release regardless of hold time. Returns whether it was held.
    pub fn force_release(&mut self) -> bool {
        let was_locked = self.locked;
        self.locked = false;
        self.locked_at = None;
        was_locked
    }

    /// Take the lock if free, keeping the original timestamp otherwise.
    pub fn reassert_at(&mut self, now: DateTime<Utc>) -> bool {
        self.acquire_at(now)
    }

    /// Whether the lock has outlived `min_hold + grace`
    pub fn is_stuck(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.held_for(now) {
            Some(held) => held > self.min_hold + grace,
            None => false,
        }
    }

    /// Cooldown since the last closed bracket has passed
    pub fn cooldown_elapsed(&self, last_closed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_closed_at {
            Some(closed) => now - closed >= self.min_cooldown,
            None => true,
        }
    }
}

impl Default for GlobalTradingLock {
    /// 30s minimum hold, 60s cooldown
    fn default() -> Self {
        Self::new(Duration::seconds(30), Duration::seconds(60))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exclusive() {
        let now = Utc::now();
        let mut lock = GlobalTradingLock::default();

        assert!(lock.acquire_at(now));
        assert!(!lock.acquire_at(now));
        assert_eq!(lock.locked_at(), Some(now));
    }

    #[test]
    fn test_release_deferred_until_min_hold() {
        let start = Utc::now();
        let mut lock = GlobalTradingLock::default();
        lock.acquire_at(start);

        assert_eq!(lock.release_at(start + Duration::seconds(10)), LockRelease::Deferred);
        assert!(lock.is_locked());
        assert_eq!(lock.release_at(start + Duration::seconds(30)), LockRelease::Released);
        assert!(!lock.is_locked());
        assert_eq!(lock.release_at(start + Duration::seconds(31)), LockRelease::NotHeld);
    }

    #[test]
    fn test_stuck_after_grace() {
        let start = Utc::now();
        let mut lock = GlobalTradingLock::default();
        lock.acquire_at(start);

        let grace = Duration::seconds(30);
        assert!(!lock.is_stuck(start + Duration::seconds(60), grace));
        assert!(lock.is_stuck(start + Duration::seconds(61), grace));
    }

    #[test]
    fn test_cooldown() {
        let closed = Utc::now();
        let lock = GlobalTradingLock::default();

        assert!(lock.cooldown_elapsed(None, closed));
        assert!(!lock.cooldown_elapsed(Some(closed), closed + Duration::seconds(59)));
        assert!(lock.cooldown_elapsed(Some(closed), closed + Duration::seconds(60)));
    }

    #[test]
    fn test_force_release() {
        let mut lock = GlobalTradingLock::default();
        assert!(!lock.force_release());
        lock.acquire_at(Utc::now());
        assert!(lock.force_release());
        assert_eq!(lock.locked_at(), None);
    }
}
