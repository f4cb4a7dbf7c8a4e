//! Permission cache with single-flight resolution
//!
//! Provides:
//! - In-memory cache keyed by (team, user) on DashMap
//! - Single-flight: concurrent misses on one key share one resolver call
//! - Synchronous invalidation per member or per team
//! - TTL backstop for invalidations missed across process boundaries
//!
//! Invalidation bumps an epoch under a write lock; a resolution only publishes
//! its result if the epoch it started under is still current, checked under the
//! read side of the same lock. A result computed before a mutation can
//! therefore never be cached after that mutation's invalidation returned.

use super::resolver::PermissionResolver;
use crate::error::Result;
use crate::types::PermissionSet;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Backstop time-to-live in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    team_id: String,
    user_id: String,
}

impl CacheKey {
    fn new(team_id: &str, user_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    permissions: PermissionSet,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(permissions: PermissionSet) -> Self {
        Self {
            permissions,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// One in-progress resolution shared by every concurrent miss on a key
struct Flight {
    epoch: u64,
    result: OnceCell<Result<PermissionSet>>,
}

/// Cached front of [`PermissionResolver`]
pub struct PermissionCache {
    resolver: Arc<PermissionResolver>,
    entries: DashMap<CacheKey, CachedEntry>,
    inflight: DashMap<CacheKey, Arc<Flight>>,
    epoch: AtomicU64,
    invalidation: RwLock<()>,
    config: CacheConfig,
    stats: DashMap<&'static str, usize>,
}

impl PermissionCache {
    pub fn new(resolver: Arc<PermissionResolver>, config: CacheConfig) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
            inflight: DashMap::new(),
            epoch: AtomicU64::new(0),
            invalidation: RwLock::new(()),
            config,
            stats: DashMap::new(),
        }
    }

    /// Cached permissions, resolving on a miss
    pub async fn get_or_resolve(&self, user_id: &str, team_id: &str) -> Result<PermissionSet> {
        let key = CacheKey::new(team_id, user_id);

        if let Some(permissions) = self.lookup(&key) {
            self.increment_stat("hits");
            return Ok(permissions);
        }
        self.increment_stat("misses");

        let flight = match self.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                self.increment_stat("coalesced");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let flight = Arc::new(Flight {
                    epoch: self.epoch.load(Ordering::SeqCst),
                    result: OnceCell::new(),
                });
                slot.insert(flight.clone());
                flight
            }
        };

        let result = flight
            .result
            .get_or_init(|| async {
                debug!("Resolving permissions for {} in team {}", user_id, team_id);
                let resolved = self.resolver.resolve(user_id, team_id).await;
                if let Ok(permissions) = &resolved {
                    self.publish(&key, permissions, flight.epoch);
                }
                resolved
            })
            .await
            .clone();

        self.inflight.remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));

        result
    }

    /// Drop the cached entry for one member
    pub fn invalidate_member(&self, user_id: &str, team_id: &str) {
        let key = CacheKey::new(team_id, user_id);
        let _guard = self.invalidation.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(&key);
        self.inflight.remove(&key);
        self.increment_stat("invalidations");
        debug!("Invalidated permissions for {} in team {}", user_id, team_id);
    }

    /// Drop every cached entry for a team
    pub fn invalidate_team(&self, team_id: &str) {
        let _guard = self.invalidation.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.retain(|key, _| key.team_id != team_id);
        self.inflight.retain(|key, _| key.team_id != team_id);
        self.increment_stat("invalidations");
        debug!("Invalidated permissions for team {}", team_id);
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        let _guard = self.invalidation.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.inflight.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            coalesced: self.get_stat("coalesced"),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<PermissionSet> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(self.config.ttl()) {
            drop(entry);
            self.entries.remove(key);
            self.increment_stat("expirations");
            return None;
        }
        Some(entry.permissions.clone())
    }

    fn publish(&self, key: &CacheKey, permissions: &PermissionSet, started_at: u64) {
        let _guard = self.invalidation.read();
        if self.epoch.load(Ordering::SeqCst) != started_at {
            debug!("Discarding resolution for {}/{} raced by invalidation", key.team_id, key.user_id);
            return;
        }

        if self.entries.len() >= self.config.capacity {
            self.evict();
        }
        self.entries
            .insert(key.clone(), CachedEntry::new(permissions.clone()));
    }

    /// Drop expired entries, then the oldest tenth if still full
    fn evict(&self) {
        let ttl = self.config.ttl();
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        if self.entries.len() < self.config.capacity {
            return;
        }

        let mut by_age: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().cached_at))
            .collect();
        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        let to_remove = (self.config.capacity / 10).max(1);
        for (key, _) in by_age.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
    }

    fn increment_stat(&self, key: &'static str) {
        *self.stats.entry(key).or_insert(0) += 1;
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub coalesced: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
