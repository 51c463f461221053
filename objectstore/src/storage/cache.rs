//! Shared block cache.
//!
//! Every `BlockFile` owns one cache. All cursors of the file read through
//! it, so a block decoded by one reader is visible to the others.
//!
//! # Design
//!
//! - Cached blocks are `Arc<Page>` and never mutated in place; a write
//!   installs a fresh `Arc`. A reader holding an older `Arc` keeps a
//!   consistent copy of that block.
//! - Eviction is first-in first-out once `capacity` blocks are resident.
//! - Thread-safe: uses a Mutex for internal synchronization.
//!
//! # Invariants
//!
//! - `blocks.len() <= capacity`
//! - Every id in `blocks` appears exactly once in `order`

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::storage::page::{Page, PageId};

/// Default cache capacity in blocks (1024 blocks = 8MB per file).
pub const DEFAULT_CACHE_BLOCKS: usize = 1024;

struct CacheInner {
    blocks: HashMap<PageId, Arc<Page>>,
    order: VecDeque<PageId>,
}

/// A reference-counted block cache keyed by block id.
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub resident: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl BlockCache {
    /// Create a new cache holding at most `capacity` blocks.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Block cache capacity must be positive");

        Self {
            inner: Mutex::new(CacheInner {
                blocks: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a block.
    #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
    #[allow(clippy::disallowed_methods)] // Arc::clone is the point of the cache
    pub fn get(&self, page_id: PageId) -> Option<Arc<Page>> {
        let inner = self.inner.lock().expect("block cache mutex poisoned");
        let found = inner.blocks.get(&page_id).map(Arc::clone);
        drop(inner);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Install a block, replacing any previous version.
    ///
    /// # Post-conditions
    /// - `get(page_id)` returns `page` until the block is evicted or replaced
    #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
    pub fn insert(&self, page_id: PageId, page: Arc<Page>) {
        let mut inner = self.inner.lock().expect("block cache mutex poisoned");

        if inner.blocks.insert(page_id, page).is_some() {
            return;
        }
        inner.order.push_back(page_id);

        while inner.blocks.len() > self.capacity {
            let Some(victim) = inner.order.pop_front() else {
                break;
            };
            inner.blocks.remove(&victim);
        }

        debug_assert_eq!(inner.blocks.len(), inner.order.len());
    }

    /// Drop a block from the cache.
    #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
    pub fn invalidate(&self, page_id: PageId) {
        let mut inner = self.inner.lock().expect("block cache mutex poisoned");
        if inner.blocks.remove(&page_id).is_some() {
            inner.order.retain(|&id| id != page_id);
        }
    }

    /// Drop every block.
    #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("block cache mutex poisoned");
        inner.blocks.clear();
        inner.order.clear();
    }

    /// Number of resident blocks.
    #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("block cache mutex poisoned")
            .blocks
            .len()
    }

    /// True if no block is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident blocks.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(byte: u8) -> Arc<Page> {
        let mut page = Page::new();
        page.write_u8(100, byte);
        Arc::new(page)
    }

    #[test]
    fn test_insert_and_get() {
        let cache = BlockCache::new(4);
        cache.insert(1, page_with(1));

        let page = cache.get(1).expect("cached");
        assert_eq!(page.read_u8(100), 1);
        assert!(cache.get(2).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.resident, 1);
    }

    #[test]
    fn test_replace_keeps_old_snapshot() {
        let cache = BlockCache::new(4);
        cache.insert(1, page_with(1));
        let old = cache.get(1).expect("cached");

        cache.insert(1, page_with(2));
        let new = cache.get(1).expect("cached");

        assert_eq!(old.read_u8(100), 1);
        assert_eq!(new.read_u8(100), 2);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = BlockCache::new(2);
        cache.insert(1, page_with(1));
        cache.insert(2, page_with(2));
        cache.insert(3, page_with(3));

        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = BlockCache::new(4);
        cache.insert(1, page_with(1));
        cache.insert(2, page_with(2));

        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = BlockCache::new(0);
    }
}
