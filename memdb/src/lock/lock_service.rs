use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::MemDbResult;

/// A granted lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockGrant {
    /// Fresh token identifying this holding of the lock.
    pub token: String,
    /// Owner that held the key before this grant, if any.
    pub previous_owner: Option<String>,
}

/// Shared locking service used by every shard of a cluster.
///
/// Locks are leases: each grant lives for its TTL unless renewed, and an
/// expired lease can be claimed by any owner.
pub trait LockServiceProvider: Send + Sync {
    /// Claims `key` for `owner` if it is free or its lease has expired.
    fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> MemDbResult<Option<LockGrant>>;

    /// Releases `key` if `token` still holds it.
    fn release(&self, key: &str, token: &str) -> MemDbResult<bool>;

    /// Extends the lease of `key` if `token` still holds it.
    fn renew(&self, key: &str, token: &str, ttl: Duration) -> MemDbResult<bool>;

    /// Returns the owner currently holding `key`.
    fn holder(&self, key: &str) -> MemDbResult<Option<String>>;

    /// Drops every lock and ownership record.
    fn clear(&self) -> MemDbResult<()>;
}

#[derive(Clone)]
pub struct LockService {
    inner: Arc<dyn LockServiceProvider>,
}

impl LockService {
    pub fn new<T: LockServiceProvider + 'static>(inner: T) -> Self {
        LockService { inner: Arc::new(inner) }
    }
}

impl Deref for LockService {
    type Target = Arc<dyn LockServiceProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Default for LockService {
    fn default() -> Self {
        LockService::new(InMemoryLockService::new())
    }
}

struct LockEntry {
    owner: String,
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process lock service shared by the shards of a local cluster.
#[derive(Default)]
pub struct InMemoryLockService {
    locks: DashMap<String, LockEntry>,
    last_owner: DashMap<String, String>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        InMemoryLockService::default()
    }
}

impl LockServiceProvider for InMemoryLockService {
    fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> MemDbResult<Option<LockGrant>> {
        let now = Instant::now();
        let token = uuid::Uuid::new_v4().to_string();
        let entry = LockEntry {
            owner: owner.to_string(),
            token: token.clone(),
            expires_at: now + ttl,
        };

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(None);
                }
                log::debug!("Lock {} expired for {}, reassigning to {}", key, occupied.get().owner, owner);
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        let previous_owner = self.last_owner.insert(key.to_string(), owner.to_string());
        Ok(Some(LockGrant {
            token,
            previous_owner,
        }))
    }

    fn release(&self, key: &str, token: &str) -> MemDbResult<bool> {
        Ok(self.locks.remove_if(key, |_, entry| entry.token == token).is_some())
    }

    fn renew(&self, key: &str, token: &str, ttl: Duration) -> MemDbResult<bool> {
        let now = Instant::now();
        match self.locks.get_mut(key) {
            Some(mut entry) if entry.token == token && !entry.is_expired(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn holder(&self, key: &str) -> MemDbResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.owner.clone()))
    }

    fn clear(&self) -> MemDbResult<()> {
        self.locks.clear();
        self.last_owner.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn test_acquire_release() {
        let service = InMemoryLockService::new();
        let grant = service.try_acquire("player:1", "s1", TTL).unwrap().unwrap();
        assert_eq!(grant.previous_owner, None);
        assert_eq!(service.holder("player:1").unwrap(), Some("s1".to_string()));

        assert!(service.try_acquire("player:1", "s2", TTL).unwrap().is_none());
        assert!(service.release("player:1", &grant.token).unwrap());
        assert_eq!(service.holder("player:1").unwrap(), None);
    }

    #[test]
    fn test_release_with_stale_token_is_noop() {
        let service = InMemoryLockService::new();
        let grant = service.try_acquire("k", "s1", TTL).unwrap().unwrap();
        assert!(!service.release("k", "not-the-token").unwrap());
        assert_eq!(service.holder("k").unwrap(), Some("s1".to_string()));
        assert!(service.release("k", &grant.token).unwrap());
        assert!(!service.release("k", &grant.token).unwrap());
    }

    #[test]
    fn test_previous_owner_reported() {
        let service = InMemoryLockService::new();
        let first = service.try_acquire("k", "s1", TTL).unwrap().unwrap();
        service.release("k", &first.token).unwrap();

        let second = service.try_acquire("k", "s2", TTL).unwrap().unwrap();
        assert_eq!(second.previous_owner, Some("s1".to_string()));
        service.release("k", &second.token).unwrap();

        let third = service.try_acquire("k", "s2", TTL).unwrap().unwrap();
        assert_eq!(third.previous_owner, Some("s2".to_string()));
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let service = InMemoryLockService::new();
        let stale = service
            .try_acquire("k", "s1", Duration::from_millis(10))
            .unwrap()
            .unwrap();
        thread::sleep(Duration::from_millis(30));

        assert_eq!(service.holder("k").unwrap(), None);
        assert!(!service.renew("k", &stale.token, TTL).unwrap());

        let fresh = service.try_acquire("k", "s2", TTL).unwrap().unwrap();
        assert!(!service.release("k", &stale.token).unwrap());
        assert!(service.renew("k", &fresh.token, TTL).unwrap());
    }

    #[test]
    fn test_single_winner_under_contention() {
        let service = Arc::new(InMemoryLockService::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    service
                        .try_acquire("contended", &format!("s{}", i), TTL)
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_clear() {
        let service = LockService::default();
        service.try_acquire("k", "s1", TTL).unwrap();
        service.clear().unwrap();
        assert_eq!(service.holder("k").unwrap(), None);
        let grant = service.try_acquire("k", "s2", TTL).unwrap().unwrap();
        assert_eq!(grant.previous_owner, None);
    }
}
