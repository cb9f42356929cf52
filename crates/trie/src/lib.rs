pub mod cache;
pub mod committer;
pub mod db;
pub mod error;
mod nibbles;
pub mod node;
mod node_hash;
mod rlp;
pub mod threadpool;
mod trie_iter;
mod visitor;

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use canopy_rlp::{constants::RLP_NULL, encode::RLPEncode};
use crossbeam::queue::SegQueue;
use ethereum_types::H256;
use keccak_hash::keccak;
use lazy_static::lazy_static;
use parking_lot::Mutex;

pub use self::cache::NodeCache;
pub use self::committer::{BatchCommitter, Committer, NullCommitter, PassThroughCommitter};
pub use self::db::{InMemoryTrieDB, NodeSource, TrieDB};
pub use self::error::TrieError;
pub use self::nibbles::Nibbles;
pub use self::node::{BranchNode, ExtensionNode, LeafNode, Node, NodeRef};
pub use self::node_hash::NodeHash;
pub use self::threadpool::ThreadPool;
pub use self::trie_iter::TrieIterator;
pub use self::visitor::{TrieVisitor, VisitContext};

lazy_static! {
    /// Hash of the empty trie: keccak of the RLP encoding of the empty byte
    /// sequence. No node object ever exists for it.
    pub static ref EMPTY_TRIE_HASH: H256 = keccak([RLP_NULL]);
}

/// Root-level branch commits fan out to the worker pool only when at least
/// this many children are dirty; below it the bookkeeping costs more than
/// the parallelism pays.
const PARALLEL_COMMIT_MIN_CHILDREN: usize = 4;

/// Behavior switches for a trie instance. No CLI or environment wiring:
/// hosts construct this directly.
#[derive(Debug, Clone)]
pub struct TrieConfig {
    /// Total bytes allowed in the node cache backing this trie.
    pub cache_memory_budget_bytes: usize,
    /// Commit dirty root-branch subtrees on a worker pool.
    pub parallel_branches: bool,
    /// When false, `commit` fails with [`TrieError::CommitsDisabled`].
    pub allow_commits: bool,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            cache_memory_budget_bytes: 32 * 1024 * 1024,
            parallel_branches: false,
            allow_commits: true,
        }
    }
}

/// Writer-side flag shared between a trie and the readers it spawned.
/// Readers bound to the root currently under rewrite fail fast instead of
/// observing a half-rewritten tree.
struct MutationGuard {
    active: AtomicBool,
    root: Mutex<H256>,
}

impl MutationGuard {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            root: Mutex::new(H256::zero()),
        }
    }

    fn enter(&self, root: H256) -> MutationPass<'_> {
        *self.root.lock() = root;
        self.active.store(true, Ordering::Release);
        MutationPass(self)
    }

    fn conflicts_with(&self, root: H256) -> bool {
        self.active.load(Ordering::Acquire) && *self.root.lock() == root
    }
}

struct MutationPass<'a>(&'a MutationGuard);

impl Drop for MutationPass<'_> {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
    }
}

/// Hash-addressed radix-16 authenticated key/value tree with structural
/// sharing between committed roots.
///
/// A trie is a single-writer structure: mutations and commit must not
/// overlap with any other operation on the same root. Reads against other
/// committed roots (through [`read_only_at`](Trie::read_only_at)) only ever
/// observe sealed nodes and may run concurrently.
pub struct Trie {
    pub(crate) src: NodeSource,
    pub root: NodeRef,
    /// Root hash the current in-memory state was derived from.
    last_committed_root: H256,
    guard: Arc<MutationGuard>,
    /// `Some(root)` marks a read-only view bound to that committed root.
    reader_root: Option<H256>,
    parallel_branches: bool,
    allow_commits: bool,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new_temp()
    }
}

impl Trie {
    /// Creates a new empty trie writing through to `db`.
    pub fn new(db: Arc<dyn TrieDB>) -> Self {
        let committer = Arc::new(PassThroughCommitter::new(db.clone()));
        Self::with_config(db, committer, TrieConfig::default())
    }

    /// Creates a trie over an already-initialized store, reading from `root`.
    pub fn open(db: Arc<dyn TrieDB>, root: H256) -> Self {
        let mut trie = Self::new(db);
        trie.set_root_hash(root);
        trie
    }

    /// Creates a trie with an explicit committer and configuration. The
    /// default cache budget selects the process-wide cache; any other budget
    /// gets a dedicated one.
    pub fn with_config(
        db: Arc<dyn TrieDB>,
        committer: Arc<dyn Committer>,
        config: TrieConfig,
    ) -> Self {
        let cache = if config.cache_memory_budget_bytes
            == TrieConfig::default().cache_memory_budget_bytes
        {
            NodeCache::global()
        } else {
            Arc::new(NodeCache::new(config.cache_memory_budget_bytes))
        };
        Self::with_parts(db, committer, cache, config)
    }

    /// Fully explicit constructor; also the injection point for tests that
    /// need an isolated cache.
    pub fn with_parts(
        db: Arc<dyn TrieDB>,
        committer: Arc<dyn Committer>,
        cache: Arc<NodeCache>,
        config: TrieConfig,
    ) -> Self {
        Self {
            src: NodeSource::new(db, cache, committer),
            root: NodeRef::default(),
            last_committed_root: *EMPTY_TRIE_HASH,
            guard: Arc::new(MutationGuard::new()),
            reader_root: None,
            parallel_branches: config.parallel_branches,
            allow_commits: config.allow_commits,
        }
    }

    /// Creates a new trie over a throwaway in-memory store.
    pub fn new_temp() -> Self {
        Self::new(Arc::new(InMemoryTrieDB::default()))
    }

    /// A read-only view over the committed root `root`, sharing this trie's
    /// store, cache and committer batch. Views may be used from other
    /// threads; a view bound to the root currently being rewritten fails its
    /// reads with [`TrieError::ConcurrentMutation`].
    pub fn read_only_at(&self, root: H256) -> Trie {
        Trie {
            src: self.src.clone(),
            root: if root == *EMPTY_TRIE_HASH {
                NodeRef::default()
            } else {
                NodeRef::from(NodeHash::from(root))
            },
            last_committed_root: root,
            guard: self.guard.clone(),
            reader_root: Some(root),
            parallel_branches: false,
            allow_commits: false,
        }
    }

    /// Retrieve the value bound to `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(root) = self.reader_root {
            if self.guard.conflicts_with(root) {
                return Err(TrieError::ConcurrentMutation(root));
            }
        }
        let path = Nibbles::from_bytes(key);
        match &self.root {
            NodeRef::Node(node, _) => node.get(&self.src, path),
            NodeRef::Hash(hash) if hash.is_valid() => {
                self.root.resolve(&self.src)?.get(&self.src, path)
            }
            _ => Ok(None),
        }
    }

    /// Read `key` under a historical committed root instead of the current
    /// one. Pure read: the trie's own state is untouched.
    pub fn get_at(&self, root: H256, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.read_only_at(root).get(key)
    }

    /// Bind `key` to `value`. An empty value removes the binding. The root
    /// stays dirty until [`commit`](Trie::commit).
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        if value.is_empty() {
            // storing an empty value is a removal
            self.remove(key)?;
            return Ok(());
        }
        if self.reader_root.is_some() {
            return Err(TrieError::SealedMutation("insert on a read-only view"));
        }
        let _mutation = self.guard.enter(self.last_committed_root);

        let path = Nibbles::from_bytes(key);
        if self.root.is_valid() {
            self.root
                .resolve_mut(&self.src)?
                .insert(&self.src, path, value)?;
        } else {
            self.root = Node::from(LeafNode::new(path, value)).into();
        }
        Ok(())
    }

    /// Remove the binding for `key`, returning its value when it was
    /// present. Removing an absent key is silent; use
    /// [`remove_strict`](Trie::remove_strict) to make it an error.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        if self.reader_root.is_some() {
            return Err(TrieError::SealedMutation("remove on a read-only view"));
        }
        if !self.root.is_valid() {
            return Ok(None);
        }
        let _mutation = self.guard.enter(self.last_committed_root);

        let path = Nibbles::from_bytes(key);
        let (trie_empty, value) = self.root.resolve_mut(&self.src)?.remove(&self.src, path)?;
        if trie_empty {
            self.root = NodeRef::default();
        }
        Ok(value)
    }

    /// Remove the binding for `key`, failing with
    /// [`TrieError::MissingForDelete`] when it is absent.
    pub fn remove_strict(&mut self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        self.remove(key)?.ok_or(TrieError::MissingForDelete)
    }

    /// The hash committing to the entire current mapping, computed from the
    /// in-memory tree without writing anything. Memoized per node, so the
    /// usual expected-hash check before commit costs one tree walk.
    pub fn root_hash(&self) -> H256 {
        if self.root.is_valid() {
            self.root.compute_hash().finalize()
        } else {
            *EMPTY_TRIE_HASH
        }
    }

    /// Switches the trie to read from a different committed root. Pending
    /// in-memory mutations are discarded: the current root reference is
    /// replaced with an unresolved placeholder.
    pub fn set_root_hash(&mut self, root: H256) {
        self.root = if root == *EMPTY_TRIE_HASH {
            NodeRef::default()
        } else {
            NodeRef::from(NodeHash::from(root))
        };
        self.last_committed_root = root;
    }

    /// Hashes, seals and persists every dirty node reachable from the root,
    /// tagged with `block_number`, and returns the new root hash.
    ///
    /// Children seal before their parents and reach the committer in seal
    /// order; the root seals last. On failure the in-memory tree keeps its
    /// pre-commit state; any prefix of nodes already written is harmless
    /// because nodes are content-addressed.
    pub fn commit(&mut self, block_number: u64) -> Result<H256, TrieError> {
        if !self.allow_commits {
            return Err(TrieError::CommitsDisabled);
        }
        if !self.root.is_valid() {
            self.last_committed_root = *EMPTY_TRIE_HASH;
            return Ok(*EMPTY_TRIE_HASH);
        }
        if let NodeRef::Hash(hash) = &self.root {
            // already sealed and persisted
            return Ok(hash.finalize());
        }
        let _mutation = self.guard.enter(self.last_committed_root);

        let mut sealed = Vec::new();
        let root_hash = if self.parallel_branches {
            self.seal_parallel(&mut sealed)?
        } else {
            self.root.seal(&mut sealed, self.src.cache(), true)?
        }
        .finalize();

        // Drain the sealed-node queue to the committer in seal order.
        let expected = sealed.len();
        let queue = SegQueue::new();
        for entry in sealed {
            queue.push(entry);
        }
        let committer = self.src.committer().clone();
        for _ in 0..expected {
            let Some((hash, encoded)) = queue.pop() else {
                return Err(TrieError::CommitRace);
            };
            committer.commit(block_number, hash, encoded)?;
        }
        if queue.pop().is_some() {
            return Err(TrieError::CommitRace);
        }

        tracing::debug!(block_number, sealed = expected, root = %root_hash, "trie committed");
        self.root = NodeRef::from(NodeHash::from(root_hash));
        self.last_committed_root = root_hash;
        Ok(root_hash)
    }

    /// Seals the dirty subtrees under a root branch on the worker pool, then
    /// the root itself. Falls back to the sequential path when the root is
    /// not a branch or too few children are dirty.
    fn seal_parallel(
        &self,
        sealed: &mut Vec<(H256, Vec<u8>)>,
    ) -> Result<NodeHash, TrieError> {
        let cache = self.src.cache();
        let NodeRef::Node(node, _) = &self.root else {
            return self.root.seal(sealed, cache, true);
        };
        let Node::Branch(branch) = node.as_ref() else {
            return self.root.seal(sealed, cache, true);
        };

        let dirty: Vec<usize> = branch
            .choices
            .iter()
            .enumerate()
            .filter(|(_, choice)| choice.is_dirty())
            .map(|(choice, _)| choice)
            .collect();
        if dirty.len() < PARALLEL_COMMIT_MIN_CHILDREN {
            return self.root.seal(sealed, cache, true);
        }
        branch.validate_shape()?;

        let worker_count = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
            .min(dirty.len());
        tracing::debug!(children = dirty.len(), workers = worker_count, "parallel branch commit");

        // Each worker seals a disjoint subtree into its own batch; batches
        // are stitched back together in slot order so the committer sees the
        // same sequence the sequential path produces.
        type ChildResult = (usize, Result<Vec<(H256, Vec<u8>)>, TrieError>);
        let results: Mutex<Vec<ChildResult>> = Mutex::new(Vec::with_capacity(dirty.len()));
        thread::scope(|scope| {
            let pool = ThreadPool::new(worker_count, scope);
            for &choice in &dirty {
                let child = &branch.choices[choice];
                let results = &results;
                pool.execute(Box::new(move || {
                    let mut batch = Vec::new();
                    let outcome = child.seal(&mut batch, cache, false).map(|_| batch);
                    results.lock().push((choice, outcome));
                }));
            }
        });

        let mut results = results.into_inner();
        results.sort_by_key(|(choice, _)| *choice);
        let mut failures = Vec::new();
        for (_, outcome) in results {
            match outcome {
                Ok(batch) => sealed.extend(batch),
                Err(err) => failures.push(err),
            }
        }
        if !failures.is_empty() {
            return Err(TrieError::AggregatedCommit(failures));
        }

        // Children are sealed and memoized; the root only seals itself.
        self.root.seal_shallow(sealed, cache, true)
    }

    /// Depth-first walk of the tree rooted at `root_hash` (which may differ
    /// from the current root), driving `visitor`. See [`TrieVisitor`].
    pub fn accept(
        &self,
        visitor: &mut dyn TrieVisitor,
        root_hash: H256,
        expect_accounts: bool,
    ) -> Result<(), TrieError> {
        visitor::walk(&self.src, root_hash, visitor, expect_accounts)
    }

    /// Obtain a merkle proof for the given key: the encoded nodes traversed
    /// toward the key, root first, including the terminal node. Also built
    /// for absent keys, proving absence. Nodes inlined in their parent do not
    /// appear separately, except for the root.
    pub fn get_proof(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, TrieError> {
        if !self.root.is_valid() {
            return Ok(Vec::new());
        }

        let mut proof = Vec::new();
        let mut path = Nibbles::from_bytes(key);
        let mut node = self.root.resolve(&self.src)?;
        loop {
            let encoded = node.encode_to_vec();
            if proof.is_empty() || encoded.len() >= 32 {
                proof.push(encoded);
            }
            let next = match node.as_ref() {
                Node::Leaf(_) => break,
                Node::Extension(extension) => {
                    if !path.skip_prefix(&extension.prefix) || !extension.child.is_valid() {
                        break;
                    }
                    extension.child.resolve(&self.src)?
                }
                Node::Branch(branch) => {
                    let Some(choice) = path.first() else { break };
                    path = path.offset(1);
                    let child = &branch.choices[choice as usize];
                    if !child.is_valid() {
                        break;
                    }
                    child.resolve(&self.src)?
                }
            };
            node = next;
        }
        Ok(proof)
    }

    /// Builds an in-memory trie from the given bindings and returns its root
    /// hash, persisting nothing.
    pub fn compute_hash_from_unsorted_iter(
        iter: impl Iterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> H256 {
        struct NullTrieDB;

        impl TrieDB for NullTrieDB {
            fn get(&self, _key: H256) -> Result<Option<Vec<u8>>, TrieError> {
                Ok(None)
            }

            fn put(&self, _key: H256, _value: Vec<u8>) -> Result<(), TrieError> {
                Ok(())
            }
        }

        let mut trie = Trie::new(Arc::new(NullTrieDB));
        for (path, value) in iter {
            // never touches the store while nothing was committed
            trie.insert(&path, value).unwrap();
        }
        trie.root_hash()
    }

    /// Checks that every node referenced from the root is reachable,
    /// counting child references against visited nodes.
    pub fn validate(self) -> Result<(), TrieError> {
        let mut expected_count: i64 = if self.root.is_valid() { 1 } else { 0 };
        for (_, node) in self.into_iter() {
            expected_count -= 1;
            match node {
                Node::Branch(branch_node) => {
                    expected_count += branch_node
                        .choices
                        .iter()
                        .filter(|child| child.is_valid())
                        .count() as i64;
                }
                Node::Extension(_) => {
                    expected_count += 1;
                }
                Node::Leaf(_) => {}
            }
        }
        if expected_count != 0 {
            return Err(TrieError::InvariantViolation(
                "trie is missing reachable nodes",
            ));
        }
        Ok(())
    }
}

impl IntoIterator for Trie {
    type Item = (Nibbles, Node);

    type IntoIter = TrieIterator;

    fn into_iter(self) -> Self::IntoIter {
        TrieIterator::new(self)
    }
}
