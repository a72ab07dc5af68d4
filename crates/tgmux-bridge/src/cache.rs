//! Per-bridge dialog/entity cache.
//!
//! One cache per bridge, keyed by the canonical peer-id scheme from
//! `tgmux_protocol::Entity::canonical_id` (supergroup `-1_000_000_000_000 -
//! id`, basic group `-id`, user `id`). Backed by `moka::future::Cache` so
//! warmup and reads can run concurrently without a hand-rolled lock,
//! grounded on the teacher's `openintent-store::cache` use of moka for its
//! warm-entry cache.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::future::Cache;
use tgmux_protocol::Entity;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

pub struct DialogCache {
    entries: Cache<i64, Entity>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DialogCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::new(max_capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn insert(&self, entity: Entity) {
        self.entries.insert(entity.canonical_id(), entity).await;
    }

    pub async fn insert_all(&self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.insert(entity).await;
        }
    }

    /// Direct canonical-id lookup, the fast path before any scan.
    pub fn get(&self, canonical_id: i64) -> Option<Entity> {
        let hit = self.entries.get(&canonical_id);
        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Linear scan by raw id, username, or canonical id — the fallback the
    /// original performed when the direct cache key didn't match because the
    /// caller spelled the reference in a different peer-id form.
    pub fn scan(&self, predicate: impl Fn(&Entity) -> bool) -> Option<Entity> {
        let found = self.entries.iter().find(|(_, entity)| predicate(entity)).map(|(_, entity)| entity);
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn by_username(&self, username: &str) -> Option<Entity> {
        let needle = username.trim_start_matches('@');
        self.scan(|e| e.username().is_some_and(|u| u.trim_start_matches('@').eq_ignore_ascii_case(needle)))
    }

    pub fn by_raw_id(&self, raw_id: i64) -> Option<Entity> {
        self.scan(|e| e.raw_id() == raw_id)
    }

    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, username: &str) -> Entity {
        Entity::User {
            id,
            username: Some(username.to_string()),
            first_name: None,
            bot: false,
        }
    }

    #[tokio::test]
    async fn direct_hit_by_canonical_id() {
        let cache = DialogCache::new(100);
        cache.insert(user(42, "alice")).await;
        let found = cache.get(42).unwrap();
        assert_eq!(found.raw_id(), 42);
    }

    #[tokio::test]
    async fn scan_by_username_is_case_insensitive() {
        let cache = DialogCache::new(100);
        cache.insert(user(42, "Alice")).await;
        let found = cache.by_username("@alice").unwrap();
        assert_eq!(found.raw_id(), 42);
    }

    #[tokio::test]
    async fn miss_increments_miss_counter() {
        let cache = DialogCache::new(100);
        assert!(cache.get(999).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn supergroup_canonical_key_differs_from_raw_id() {
        let cache = DialogCache::new(100);
        let sg = Entity::Supergroup {
            id: 7,
            title: "t".into(),
            megagroup: true,
            broadcast: false,
        };
        cache.insert(sg.clone()).await;
        assert!(cache.get(7).is_none());
        assert!(cache.get(sg.canonical_id()).is_some());
        assert!(cache.by_raw_id(7).is_some());
    }
}
