//! Caller-owned cache of assembled threads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::ConversationScope;
use crate::lifecycle::ThreadNode;
use crate::storage::Message;

pub type Forest = Arc<Vec<ThreadNode>>;

struct CacheEntry {
    forest: Forest,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Thread forests keyed by scope fingerprint.
///
/// Every invalidation bumps a generation counter. A reader records the
/// generation before loading a thread and hands it back to [`insert`], which
/// refuses the forest if a write happened in between.
///
/// [`insert`]: ThreadCache::insert
pub struct ThreadCache {
    ttl: Duration,
    capacity: usize,
    generation: u64,
    entries: HashMap<String, CacheEntry>,
}

impl ThreadCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            generation: 0,
            entries: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&mut self, scope: &ConversationScope) -> Option<Forest> {
        let key = scope.fingerprint();
        let expired = self.entries.get(&key)?.is_expired(self.ttl);
        if expired {
            self.entries.remove(&key);
            return None;
        }
        self.entries.get(&key).map(|entry| Arc::clone(&entry.forest))
    }

    /// Store `forest` for `scope` if nothing was invalidated since
    /// `generation` was read. Returns whether it was stored.
    pub fn insert(&mut self, scope: &ConversationScope, generation: u64, forest: Forest) -> bool {
        if generation != self.generation || self.capacity == 0 {
            return false;
        }
        let key = scope.fingerprint();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                forest,
                cached_at: Instant::now(),
            },
        );
        true
    }

    /// Drop the cached thread containing `message`.
    pub fn invalidate_message(&mut self, message: &Message) -> usize {
        self.generation += 1;
        match message.scope() {
            Some(scope) => usize::from(self.entries.remove(&scope.fingerprint()).is_some()),
            None => 0,
        }
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expired entries go first, then the oldest one if still at capacity.
    fn evict(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.cached_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            log::debug!("Thread cache full; evicting {key}");
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ConversationId, Timestamp, UserId};
    use crate::storage::NewMessage;

    fn scope(name: &str) -> ConversationScope {
        ConversationScope::conversation(ConversationId::from(name))
    }

    fn forest() -> Forest {
        Arc::new(Vec::new())
    }

    #[test]
    fn test_hit_after_insert() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 8);
        let generation = cache.generation();
        assert!(cache.insert(&scope("room"), generation, forest()));
        assert!(cache.get(&scope("room")).is_some());
        assert!(cache.get(&scope("other")).is_none());
    }

    #[test]
    fn test_direct_scope_key_ignores_participant_order() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 8);
        let (a, b) = (UserId::from("a"), UserId::from("b"));
        let generation = cache.generation();
        cache.insert(&ConversationScope::direct(a.clone(), b.clone()), generation, forest());
        assert!(cache.get(&ConversationScope::direct(b, a)).is_some());
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let mut cache = ThreadCache::new(Duration::ZERO, 8);
        let generation = cache.generation();
        cache.insert(&scope("room"), generation, forest());
        assert!(cache.get(&scope("room")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_generation_is_refused() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 8);
        let before = cache.generation();
        let message = NewMessage::broadcast(UserId::from("a"), ConversationId::from("room"), "x")
            .into_message(Timestamp::now());
        cache.invalidate_message(&message);
        assert!(!cache.insert(&scope("room"), before, forest()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_write_invalidates_only_its_scope() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 8);
        let generation = cache.generation();
        cache.insert(&scope("room"), generation, forest());
        cache.insert(&scope("lobby"), generation, forest());

        let message = NewMessage::broadcast(UserId::from("a"), ConversationId::from("room"), "x")
            .into_message(Timestamp::now());
        assert_eq!(cache.invalidate_message(&message), 1);
        assert!(cache.get(&scope("room")).is_none());
        assert!(cache.get(&scope("lobby")).is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 2);
        let generation = cache.generation();
        cache.insert(&scope("first"), generation, forest());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(&scope("second"), generation, forest());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(&scope("third"), generation, forest());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&scope("first")).is_none());
        assert!(cache.get(&scope("third")).is_some());
    }

    #[test]
    fn test_clear_empties_and_bumps_generation() {
        let mut cache = ThreadCache::new(Duration::from_secs(60), 8);
        let generation = cache.generation();
        cache.insert(&scope("room"), generation, forest());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.generation() > generation);
    }
}
