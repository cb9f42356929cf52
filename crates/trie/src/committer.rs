use std::sync::Arc;

use ethereum_types::H256;
use parking_lot::Mutex;

use crate::{db::TrieDB, error::TrieError};

/// Sink for sealed nodes.
///
/// `commit` receives nodes in the order they seal (children before parents,
/// root last) tagged with the block height they belong to; implementations
/// forward them to the backing store and may batch by block.
pub trait Committer: Send + Sync {
    fn commit(&self, block_number: u64, hash: H256, encoded: Vec<u8>) -> Result<(), TrieError>;

    /// Fast path for nodes accepted for the current block but not yet
    /// persisted. The default has no in-flight batch.
    fn find_cached(&self, _hash: H256) -> Option<Vec<u8>> {
        None
    }
}

/// Committer for read-only tries: every commit attempt is rejected.
pub struct NullCommitter;

impl Committer for NullCommitter {
    fn commit(&self, _block_number: u64, _hash: H256, _encoded: Vec<u8>) -> Result<(), TrieError> {
        Err(TrieError::CommitsDisabled)
    }
}

/// Adapts a raw key/value store by writing each sealed node immediately,
/// ignoring the block tag.
pub struct PassThroughCommitter {
    db: Arc<dyn TrieDB>,
}

impl PassThroughCommitter {
    pub fn new(db: Arc<dyn TrieDB>) -> Self {
        Self { db }
    }
}

impl Committer for PassThroughCommitter {
    fn commit(&self, _block_number: u64, hash: H256, encoded: Vec<u8>) -> Result<(), TrieError> {
        self.db.put(hash, encoded)
    }
}

/// Buffers sealed nodes per block and writes them to the store in one batch
/// on [`flush`](BatchCommitter::flush). Until then the in-flight nodes stay
/// reachable through `find_cached`.
pub struct BatchCommitter {
    db: Arc<dyn TrieDB>,
    pending: Mutex<Vec<(u64, H256, Vec<u8>)>>,
}

impl BatchCommitter {
    pub fn new(db: Arc<dyn TrieDB>) -> Self {
        Self {
            db,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Writes every buffered node through to the store, in acceptance order.
    pub fn flush(&self) -> Result<(), TrieError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(nodes = pending.len(), "flushing committer batch");
        self.db.put_batch(
            pending
                .into_iter()
                .map(|(_, hash, encoded)| (hash, encoded))
                .collect(),
        )
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Committer for BatchCommitter {
    fn commit(&self, block_number: u64, hash: H256, encoded: Vec<u8>) -> Result<(), TrieError> {
        self.pending.lock().push((block_number, hash, encoded));
        Ok(())
    }

    fn find_cached(&self, hash: H256) -> Option<Vec<u8>> {
        self.pending
            .lock()
            .iter()
            .rev()
            .find(|(_, pending_hash, _)| *pending_hash == hash)
            .map(|(_, _, encoded)| encoded.clone())
    }
}
