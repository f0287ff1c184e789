//! Lock Manager - per-resource mutual exclusion with a time-to-live.
//!
//! A lock older than its TTL is treated as abandoned: the next `acquire`
//! reclaims it and `is_locked` clears it lazily. At most one live lock
//! exists per resource; the `DashMap` entry API makes check-and-insert
//! atomic per key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tether_engine::Timestamp;

use crate::clock::Clock;

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub resource: String,
    pub acquired_at: Timestamp,
    pub ttl: Duration,
    token: u64,
}

impl Lock {
    /// Whether the lock has outlived its TTL at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        u128::from(now.saturating_sub(self.acquired_at)) > self.ttl.as_millis()
    }
}

/// Table of live locks, shared by clone.
#[derive(Debug, Clone)]
pub struct LockManager {
    locks: Arc<DashMap<String, Lock>>,
    next_token: Arc<AtomicU64>,
    clock: Clock,
}

impl LockManager {
    pub fn new(clock: Clock) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
            clock,
        }
    }

    fn try_acquire(&self, resource: &str, ttl: Duration) -> Option<u64> {
        let now = self.clock.now();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let lock = Lock {
            resource: resource.to_string(),
            acquired_at: now,
            ttl,
            token,
        };

        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(mut held) => {
                if !held.get().is_expired(now) {
                    return None;
                }
                tracing::warn!(
                    resource = %resource,
                    held_for_ms = now.saturating_sub(held.get().acquired_at),
                    "Reclaiming stale lock"
                );
                held.insert(lock);
            }
            Entry::Vacant(slot) => {
                slot.insert(lock);
            }
        }

        tracing::trace!(resource = %resource, "Lock acquired");
        Some(token)
    }

    /// Acquire a lock that stays held until [`release`](Self::release) or
    /// TTL expiry.
    pub fn acquire(&self, resource: &str, ttl: Duration) -> bool {
        self.try_acquire(resource, ttl).is_some()
    }

    /// Acquire a lock released when the returned guard drops.
    ///
    /// The guard only releases its own acquisition: if the lock expired and
    /// was reclaimed by someone else, dropping the guard leaves it alone.
    pub fn lease(&self, resource: &str, ttl: Duration) -> Option<LockGuard> {
        self.try_acquire(resource, ttl).map(|token| LockGuard {
            manager: self.clone(),
            resource: resource.to_string(),
            token,
        })
    }

    /// Whether a live lock exists. Expired locks are cleared as a side
    /// effect.
    pub fn is_locked(&self, resource: &str) -> bool {
        let now = self.clock.now();
        let expired = match self.locks.get(resource) {
            Some(lock) => lock.is_expired(now),
            None => return false,
        };
        if expired {
            self.locks
                .remove_if(resource, |_, lock| lock.is_expired(now));
            tracing::debug!(resource = %resource, "Cleared expired lock");
            return false;
        }
        true
    }

    /// Release a lock. Releasing an unheld lock is a no-op.
    pub fn release(&self, resource: &str) {
        if self.locks.remove(resource).is_some() {
            tracing::trace!(resource = %resource, "Lock released");
        }
    }

    fn release_token(&self, resource: &str, token: u64) {
        if self
            .locks
            .remove_if(resource, |_, lock| lock.token == token)
            .is_some()
        {
            tracing::trace!(resource = %resource, "Lock lease released");
        }
    }

    /// The lock currently recorded for a resource, live or not.
    pub fn get(&self, resource: &str) -> Option<Lock> {
        self.locks.get(resource).map(|lock| lock.clone())
    }

    /// Number of recorded locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    resource: String,
    token: u64,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release_token(&self.resource, self.token);
    }
}
