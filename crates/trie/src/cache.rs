use std::num::NonZeroUsize;

use ethereum_types::H256;
use lru::LruCache;
use parking_lot::Mutex;

/// Estimated size of a serialized node, used to turn a byte budget into an
/// entry count. Branch nodes with 16 hashed children dominate state tries.
const AVERAGE_NODE_SIZE: usize = 384;

/// Default byte budget for the process-wide cache.
const DEFAULT_CACHE_BUDGET: usize = 32 * 1024 * 1024;

lazy_static::lazy_static! {
    static ref GLOBAL_NODE_CACHE: std::sync::Arc<NodeCache> =
        std::sync::Arc::new(NodeCache::new(DEFAULT_CACHE_BUDGET));
}

/// Process-wide bounded map from node hash to serialized node, with LRU
/// eviction. Holds only sealed encodings: dirty nodes have no hash yet and
/// can never appear here. Safe to share across tries because entries are
/// content-addressed.
pub struct NodeCache {
    entries: Mutex<LruCache<H256, Vec<u8>>>,
}

impl NodeCache {
    /// Builds a cache sized for the given byte budget.
    pub fn new(memory_budget_bytes: usize) -> Self {
        let entry_count = (memory_budget_bytes / AVERAGE_NODE_SIZE).max(1);
        tracing::debug!(memory_budget_bytes, entry_count, "node cache created");
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(entry_count).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// The shared cache every trie uses unless one is injected explicitly.
    pub fn global() -> std::sync::Arc<NodeCache> {
        GLOBAL_NODE_CACHE.clone()
    }

    pub fn get(&self, hash: &H256) -> Option<Vec<u8>> {
        self.entries.lock().get(hash).cloned()
    }

    pub fn insert(&self, hash: H256, encoded: Vec<u8>) {
        debug_assert!(!encoded.is_empty());
        self.entries.lock().put(hash, encoded);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
