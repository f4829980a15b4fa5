//! Deduplication of assignment and bandit events.
use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lru::LruCache;

/// Default capacity of [`LruAssignmentCache`] for both clients.
pub const DEFAULT_ASSIGNMENT_CACHE_SIZE: usize = 100;

/// Identifies a subject's assignment for a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentCacheKey {
    /// Subject the assignment was made for.
    pub subject_key: String,
    /// Flag key, or bandit flag key for bandit caches.
    pub flag_key: String,
}

/// What was assigned the last time an event was logged for a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssignmentCacheValue {
    /// Variation assignment.
    Variation {
        /// Allocation that matched.
        allocation_key: String,
        /// Variation that was assigned.
        variation_key: String,
    },
    /// Bandit action selection.
    Bandit {
        /// Bandit that selected the action.
        bandit_key: String,
        /// Selected action, or a placeholder when no action was selected.
        action_key: String,
    },
}

/// Remembers logged assignments so identical events are only logged once.
pub trait AssignmentCache: Send + Sync {
    /// Record `value` for `key`. Returns `true` if the event should be logged: the key is new or
    /// its previous value differs.
    fn put_if_absent(&self, key: AssignmentCacheKey, value: AssignmentCacheValue) -> bool;
}

/// Least-recently-used [`AssignmentCache`].
///
/// An entry evicted and seen again is logged again.
pub struct LruAssignmentCache {
    cache: Mutex<LruCache<AssignmentCacheKey, AssignmentCacheValue>>,
}

impl LruAssignmentCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> LruAssignmentCache {
        LruAssignmentCache {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cache that never evicts.
    pub fn unbounded() -> LruAssignmentCache {
        LruAssignmentCache {
            cache: Mutex::new(LruCache::unbounded()),
        }
    }
}

impl Default for LruAssignmentCache {
    fn default() -> Self {
        match NonZeroUsize::new(DEFAULT_ASSIGNMENT_CACHE_SIZE) {
            Some(capacity) => LruAssignmentCache::new(capacity),
            None => LruAssignmentCache::unbounded(),
        }
    }
}

impl AssignmentCache for LruAssignmentCache {
    fn put_if_absent(&self, key: AssignmentCacheKey, value: AssignmentCacheValue) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.get(&key) == Some(&value) {
            return false;
        }
        cache.put(key, value);
        true
    }
}
