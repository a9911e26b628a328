//! Read-lock counter gating store mutation
//!
//! Held while a save or a full query is reading a snapshot of the store.
//! While it is held, mutating events are deferred instead of applied.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct ReadLock {
    count: Arc<AtomicUsize>,
}

impl ReadLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock; returns true on the 0 → 1 transition
    pub fn acquire(&self) -> bool {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        debug!("Read lock acquired ({} holders)", previous + 1);
        previous == 0
    }

    /// Drop the lock; returns true on the 1 → 0 transition
    ///
    /// Releasing an unheld lock is logged and ignored; the count never goes
    /// below zero.
    pub fn release(&self) -> bool {
        let result = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match result {
            Ok(previous) => {
                debug!("Read lock released ({} holders)", previous - 1);
                previous == 1
            }
            Err(_) => {
                warn!("Read lock released while not held");
                false
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }

    pub fn holders(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_reported_once() {
        let lock = ReadLock::new();
        assert!(lock.acquire());
        assert!(!lock.acquire());
        assert_eq!(lock.holders(), 2);
        assert!(!lock.release());
        assert!(lock.release());
        assert!(!lock.is_held());
    }

    #[test]
    fn never_negative() {
        let lock = ReadLock::new();
        assert!(!lock.release());
        assert_eq!(lock.holders(), 0);
        assert!(lock.acquire());
    }

    #[test]
    fn clones_share_the_count() {
        let lock = ReadLock::new();
        let other = lock.clone();
        lock.acquire();
        assert!(other.is_held());
        assert!(other.release());
        assert!(!lock.is_held());
    }
}
