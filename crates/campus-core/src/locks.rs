//! Cooperative named leases with expiry.
//!
//! Locks here are advisory: they thin out contention on hot resources (a
//! single section during a registration rush) but correctness always rests
//! on event-store version fencing.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

/// Process-wide registry of named leases.
///
/// A lease auto-expires at `acquired_at + ttl`, so a crashed holder cannot
/// wedge the resource; any later caller may reclaim an expired entry.
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    poll_interval: Duration,
    // Handed to leases so dropping one can release its lock.
    self_ref: Weak<LockManager>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            locks: DashMap::new(),
            poll_interval: Duration::from_millis(10),
            self_ref: self_ref.clone(),
        })
    }

    /// Try to acquire `resource_id` for `owner`, waiting up to
    /// `wait_timeout`. Returns `None` if the lease could not be obtained in
    /// time. Re-acquiring a lease the owner already holds extends it.
    pub async fn acquire(
        &self,
        resource_id: &str,
        owner: &str,
        ttl: Duration,
        wait_timeout: Duration,
    ) -> Option<Lease> {
        let deadline = Instant::now() + wait_timeout;

        loop {
            if let Some(expires_at) = self.try_acquire(resource_id, owner, ttl) {
                return Some(Lease {
                    resource_id: resource_id.to_string(),
                    owner: owner.to_string(),
                    expires_at,
                    manager: self.self_ref.clone(),
                });
            }

            if Instant::now() >= deadline {
                debug!(resource_id, owner, "lock wait timed out");
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn try_acquire(&self, resource_id: &str, owner: &str, ttl: Duration) -> Option<Instant> {
        let now = Instant::now();
        let expires_at = now + ttl;

        match self.locks.entry(resource_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(LockEntry {
                    owner: owner.to_string(),
                    expires_at,
                });
                Some(expires_at)
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get();
                if entry.owner == owner || entry.expires_at <= now {
                    slot.insert(LockEntry {
                        owner: owner.to_string(),
                        expires_at,
                    });
                    Some(expires_at)
                } else {
                    None
                }
            }
        }
    }

    /// Release a lease. Succeeds only if `owner` still holds the resource;
    /// an expired lease that another caller reclaimed is left untouched.
    pub fn release(&self, resource_id: &str, owner: &str) -> bool {
        self.locks
            .remove_if(resource_id, |_, entry| entry.owner == owner)
            .is_some()
    }

    /// Live (unexpired) leases, as `(resource_id, owner)` pairs.
    pub fn active_locks(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        self.locks
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .map(|entry| (entry.key().clone(), entry.value().owner.clone()))
            .collect()
    }
}

/// A held lease. Dropping it releases the lock (owner-checked, so a lease
/// that expired and was reclaimed elsewhere is never stolen back).
#[derive(Debug)]
pub struct Lease {
    resource_id: String,
    owner: String,
    expires_at: Instant,
    manager: Weak<LockManager>,
}

impl Lease {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(&self.resource_id, &self.owner);
        }
    }
}
