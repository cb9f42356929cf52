use std::{collections::HashMap, sync::Arc};

use ethereum_types::H256;
use parking_lot::Mutex;

use crate::{cache::NodeCache, committer::Committer, error::TrieError};

/// Backing key/value store for sealed nodes.
///
/// Keys are 32-byte content hashes; values are node encodings. Reads must be
/// safe to issue concurrently; writes arrive serialized, one commit at a time.
pub trait TrieDB: Send + Sync {
    fn get(&self, key: H256) -> Result<Option<Vec<u8>>, TrieError>;
    fn put(&self, key: H256, value: Vec<u8>) -> Result<(), TrieError>;

    fn put_batch(&self, key_values: Vec<(H256, Vec<u8>)>) -> Result<(), TrieError> {
        for (key, value) in key_values {
            self.put(key, value)?;
        }
        Ok(())
    }
}

/// InMemory implementation for the TrieDB trait, with get and put operations.
#[derive(Default)]
pub struct InMemoryTrieDB {
    inner: Arc<Mutex<HashMap<H256, Vec<u8>>>>,
}

impl InMemoryTrieDB {
    pub fn new(map: Arc<Mutex<HashMap<H256, Vec<u8>>>>) -> Self {
        Self { inner: map }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl TrieDB for InMemoryTrieDB {
    fn get(&self, key: H256) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self.inner.lock().get(&key).cloned())
    }

    fn put(&self, key: H256, value: Vec<u8>) -> Result<(), TrieError> {
        self.inner.lock().insert(key, value);
        Ok(())
    }

    fn put_batch(&self, key_values: Vec<(H256, Vec<u8>)>) -> Result<(), TrieError> {
        let mut db = self.inner.lock();

        for (key, value) in key_values {
            db.insert(key, value);
        }

        Ok(())
    }
}

/// Where node bytes come from when an `Unknown` reference is materialized:
/// the shared node cache first, then the committer's in-flight batch, then
/// the backing store. Store hits are fed back into the cache.
#[derive(Clone)]
pub struct NodeSource {
    db: Arc<dyn TrieDB>,
    cache: Arc<NodeCache>,
    committer: Arc<dyn Committer>,
}

impl NodeSource {
    pub(crate) fn new(
        db: Arc<dyn TrieDB>,
        cache: Arc<NodeCache>,
        committer: Arc<dyn Committer>,
    ) -> Self {
        Self {
            db,
            cache,
            committer,
        }
    }

    /// Fetch the encoding of the node with the given hash, or `None` if no
    /// tier knows it.
    pub fn load(&self, hash: H256) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(encoded) = self.cache.get(&hash) {
            return Ok(Some(encoded));
        }
        if let Some(encoded) = self.committer.find_cached(hash) {
            return Ok(Some(encoded));
        }
        let Some(encoded) = self.db.get(hash)? else {
            return Ok(None);
        };
        self.cache.insert(hash, encoded.clone());
        Ok(Some(encoded))
    }

    pub(crate) fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub(crate) fn committer(&self) -> &Arc<dyn Committer> {
        &self.committer
    }
}
