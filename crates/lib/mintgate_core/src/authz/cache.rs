//! In-memory authorization cache with TTL-based expiration.
//!
//! Keyed by address. Resolver mutations invalidate the affected address
//! before returning. Each invalidation bumps a per-address generation; a
//! resolve that read the store under an older generation does not store its
//! result. The TTL bounds staleness for changes made by other processes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Authorization;
use crate::models::Address;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Authorization,
    expires_at: DateTime<Utc>,
}

/// Generation observed before a store read. Passed back to
/// [`PermissionCache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    address: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Address, CacheEntry>,
    // Not pruned: forgetting a generation would let an older read land.
    generations: HashMap<Address, u64>,
    epoch: u64,
}

impl Inner {
    fn generation(&self, address: &Address) -> Generation {
        Generation {
            epoch: self.epoch,
            address: self.generations.get(address).copied().unwrap_or(0),
        }
    }
}

/// Address → authorization cache.
#[derive(Debug)]
pub struct PermissionCache {
    inner: RwLock<Inner>,
    ttl: chrono::Duration,
}

impl PermissionCache {
    /// `None` when `ttl` is zero (caching disabled).
    pub fn with_ttl(ttl: Duration) -> Option<Self> {
        if ttl.is_zero() {
            return None;
        }
        Some(Self {
            inner: RwLock::new(Inner::default()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        })
    }

    /// Get a cached value if it exists and has not expired.
    pub async fn get(&self, address: &Address) -> Option<Authorization> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(address)
            .filter(|entry| Utc::now() < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Current generation of `address`. Take it before reading the store.
    pub async fn generation(&self, address: &Address) -> Generation {
        self.inner.read().await.generation(address)
    }

    /// Store `value` unless `address` was invalidated since `seen` was
    /// taken. Returns whether the value was stored.
    pub async fn set(&self, address: Address, value: Authorization, seen: Generation) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation(&address) != seen {
            return false;
        }
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        inner
            .entries
            .insert(address, CacheEntry { value, expires_at });
        true
    }

    pub async fn invalidate(&self, address: &Address) {
        let mut inner = self.inner.write().await;
        inner.entries.remove(address);
        *inner.generations.entry(*address).or_insert(0) += 1;
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.epoch += 1;
    }

    /// Drop expired entries.
    pub async fn prune(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        before - inner.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Access;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn admin() -> Authorization {
        Authorization::new(None, &Access::Admin(Default::default()), false)
    }

    #[test]
    fn zero_ttl_disables_cache() {
        assert!(PermissionCache::with_ttl(Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn set_get_invalidate() {
        let cache = PermissionCache::with_ttl(Duration::from_secs(60)).unwrap();
        assert!(cache.get(&addr(1)).await.is_none());

        let g1 = cache.generation(&addr(1)).await;
        let g2 = cache.generation(&addr(2)).await;
        assert!(cache.set(addr(1), admin(), g1).await);
        assert!(cache.set(addr(2), admin(), g2).await);
        assert_eq!(cache.get(&addr(1)).await, Some(admin()));

        cache.invalidate(&addr(1)).await;
        assert!(cache.get(&addr(1)).await.is_none());
        assert!(cache.get(&addr(2)).await.is_some());

        cache.clear().await;
        assert!(cache.get(&addr(2)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss_and_prune() {
        let cache = PermissionCache::with_ttl(Duration::from_millis(1)).unwrap();
        let seen = cache.generation(&addr(1)).await;
        cache.set(addr(1), admin(), seen).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&addr(1)).await.is_none());
        assert_eq!(cache.prune().await, 1);
    }

    #[tokio::test]
    async fn invalidation_rejects_older_reads() {
        let cache = PermissionCache::with_ttl(Duration::from_secs(60)).unwrap();
        let seen = cache.generation(&addr(1)).await;
        cache.invalidate(&addr(1)).await;
        assert!(!cache.set(addr(1), admin(), seen).await);
        assert!(cache.get(&addr(1)).await.is_none());

        let other = cache.generation(&addr(2)).await;
        cache.clear().await;
        assert!(!cache.set(addr(2), admin(), other).await);

        let fresh = cache.generation(&addr(1)).await;
        assert!(cache.set(addr(1), admin(), fresh).await);
        assert!(cache.get(&addr(1)).await.is_some());
    }
}
