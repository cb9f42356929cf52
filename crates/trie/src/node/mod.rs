mod branch;
mod extension;
mod leaf;

use std::sync::{Arc, OnceLock};

pub use branch::BranchNode;
pub use extension::ExtensionNode;
pub use leaf::LeafNode;

use crate::{
    cache::NodeCache, db::NodeSource, error::TrieError, nibbles::Nibbles, node_hash::NodeHash,
};
use canopy_rlp::encode::RLPEncode;
use ethereum_types::H256;
use keccak_hash::keccak;

/// A reference a tree edge holds to a node.
///
/// Materialized nodes carry a memoized hash cell: while the cell is empty the
/// node is dirty (created or touched for mutation since it was last sealed).
/// `Hash` is the `Unknown` placeholder for a sealed node living in the cache
/// or the backing store; resolving it materializes a fresh, exclusively owned
/// copy, which is what makes historical roots safe to share.
#[derive(Clone, Debug)]
pub enum NodeRef {
    /// The node is embedded within the reference.
    Node(Arc<Node>, OnceLock<NodeHash>),
    /// The node is in the cache or backing store, referenced by its hash.
    Hash(NodeHash),
}

impl NodeRef {
    /// Materializes the referenced node for reading. Does not rewire the
    /// reference: repeated reads of a `Hash` reference re-fetch.
    ///
    /// Returns `Ok(None)` when the reference is valid but no tier knows the
    /// hash; callers surface that as [`TrieError::NodeMissing`].
    pub fn get_node(&self, src: &NodeSource) -> Result<Option<Arc<Node>>, TrieError> {
        match self {
            NodeRef::Node(node, _) => Ok(Some(node.clone())),
            NodeRef::Hash(NodeHash::Inline((_, 0))) => Ok(None),
            NodeRef::Hash(hash @ NodeHash::Inline(_)) => {
                Ok(Some(Arc::new(Node::decode(hash.as_ref())?)))
            }
            NodeRef::Hash(NodeHash::Hashed(h)) => Ok(src
                .load(*h)?
                // content-addressed: reject bytes that do not hash back to the key
                .filter(|rlp| !rlp.is_empty() && keccak(rlp.as_slice()) == *h)
                .map(|rlp| Node::decode(&rlp))
                .transpose()?
                .map(Arc::new)),
        }
    }

    /// Materializes the referenced node for mutation and wires it into the
    /// tree. Clears the hash memo: whatever happens next invalidates it.
    ///
    /// Sealed nodes are never edited in place; a shared node is cloned first
    /// (copy-on-write through [`Arc::make_mut`]).
    pub fn get_node_mut(&mut self, src: &NodeSource) -> Result<Option<&mut Node>, TrieError> {
        if let NodeRef::Hash(hash) = self {
            let resolved = match hash {
                NodeHash::Inline((_, 0)) => None,
                NodeHash::Inline(_) => Some(Node::decode(hash.as_ref())?),
                NodeHash::Hashed(h) => src
                    .load(*h)?
                    .filter(|rlp| !rlp.is_empty() && keccak(rlp.as_slice()) == *h)
                    .map(|rlp| Node::decode(&rlp))
                    .transpose()?,
            };
            let Some(node) = resolved else {
                return Ok(None);
            };
            *self = NodeRef::Node(Arc::new(node), OnceLock::new());
        }
        match self {
            NodeRef::Node(node, memo) => {
                memo.take();
                Ok(Some(Arc::make_mut(node)))
            }
            NodeRef::Hash(_) => Ok(None),
        }
    }

    /// [`get_node`](Self::get_node), with an absent node turned into
    /// [`TrieError::NodeMissing`].
    pub(crate) fn resolve(&self, src: &NodeSource) -> Result<Arc<Node>, TrieError> {
        self.get_node(src)?
            .ok_or_else(|| TrieError::NodeMissing(self.compute_hash().finalize()))
    }

    /// [`get_node_mut`](Self::get_node_mut), with an absent node turned into
    /// [`TrieError::NodeMissing`].
    pub(crate) fn resolve_mut(&mut self, src: &NodeSource) -> Result<&mut Node, TrieError> {
        let missing = match self {
            NodeRef::Hash(hash) => Some(hash.finalize()),
            NodeRef::Node(..) => None,
        };
        match self.get_node_mut(src)? {
            Some(node) => Ok(node),
            None => Err(TrieError::NodeMissing(missing.unwrap_or_default())),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            NodeRef::Node(_, _) => true,
            NodeRef::Hash(hash) => hash.is_valid(),
        }
    }

    /// True while the reference holds a materialized node that has not been
    /// sealed into the backing store.
    pub fn is_dirty(&self) -> bool {
        matches!(self, NodeRef::Node(..))
    }

    pub fn compute_hash(&self) -> NodeHash {
        *self.compute_hash_ref()
    }

    pub fn compute_hash_ref(&self) -> &NodeHash {
        match self {
            NodeRef::Node(node, memo) => memo.get_or_init(|| node.compute_hash()),
            NodeRef::Hash(hash) => hash,
        }
    }

    pub fn clear_hash(&mut self) {
        if let NodeRef::Node(_, memo) = self {
            memo.take();
        }
    }

    /// Seals the subtree below this reference, post-order: children first,
    /// then the node itself. Every node whose encoding reaches 32 bytes is
    /// pushed onto `acc` and into the node cache; smaller nodes travel inline
    /// in their parent. At the root, `is_root` forces the 32-byte form so the
    /// tree stays reachable by hash regardless of its size.
    ///
    /// References are left materialized: detaching is the caller's final step
    /// once the sealed batch has safely reached the committer.
    pub fn seal(
        &self,
        acc: &mut Vec<(H256, Vec<u8>)>,
        cache: &NodeCache,
        is_root: bool,
    ) -> Result<NodeHash, TrieError> {
        let NodeRef::Node(node, _) = self else {
            return Ok(self.compute_hash());
        };
        match node.as_ref() {
            Node::Branch(branch) => {
                branch.validate_shape()?;
                for choice in branch.choices.iter() {
                    choice.seal(acc, cache, false)?;
                }
            }
            Node::Extension(extension) => {
                extension.validate_shape()?;
                extension.child.seal(acc, cache, false)?;
            }
            Node::Leaf(_) => {}
        }
        self.seal_shallow(acc, cache, is_root)
    }

    /// Seals this node alone. Every materialized child must already be
    /// sealed so the memoized child hashes feed this node's encoding.
    pub(crate) fn seal_shallow(
        &self,
        acc: &mut Vec<(H256, Vec<u8>)>,
        cache: &NodeCache,
        is_root: bool,
    ) -> Result<NodeHash, TrieError> {
        let NodeRef::Node(node, memo) = self else {
            return Ok(self.compute_hash());
        };
        let encoded = node.encode_to_vec();
        let hash = *memo.get_or_init(|| NodeHash::from_encoded(&encoded));
        match hash {
            NodeHash::Hashed(h) => {
                cache.insert(h, encoded.clone());
                acc.push((h, encoded));
            }
            NodeHash::Inline(_) if is_root => {
                let h = hash.finalize();
                cache.insert(h, encoded.clone());
                acc.push((h, encoded));
            }
            NodeHash::Inline(_) => {}
        }
        Ok(hash)
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::Hash(NodeHash::default())
    }
}

impl From<Node> for NodeRef {
    fn from(value: Node) -> Self {
        Self::Node(Arc::new(value), OnceLock::new())
    }
}

impl From<NodeHash> for NodeRef {
    fn from(value: NodeHash) -> Self {
        Self::Hash(value)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.compute_hash() == other.compute_hash()
    }
}

/// A node of the trie.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Branch(Box<BranchNode>),
    Extension(ExtensionNode),
    Leaf(LeafNode),
}

impl From<Box<BranchNode>> for Node {
    fn from(val: Box<BranchNode>) -> Self {
        Node::Branch(val)
    }
}

impl From<BranchNode> for Node {
    fn from(val: BranchNode) -> Self {
        Node::Branch(Box::new(val))
    }
}

impl From<ExtensionNode> for Node {
    fn from(val: ExtensionNode) -> Self {
        Node::Extension(val)
    }
}

impl From<LeafNode> for Node {
    fn from(val: LeafNode) -> Self {
        Node::Leaf(val)
    }
}

impl Node {
    /// Retrieves a value from the subtree originating from this node given its path
    pub fn get(&self, src: &NodeSource, path: Nibbles) -> Result<Option<Vec<u8>>, TrieError> {
        match self {
            Node::Branch(n) => n.get(src, path),
            Node::Extension(n) => n.get(src, path),
            Node::Leaf(n) => n.get(path),
        }
    }

    /// Inserts a value into the subtree originating from this node.
    pub fn insert(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<(), TrieError> {
        let new_node = match self {
            Node::Branch(n) => {
                n.insert(src, path, value)?;
                None
            }
            Node::Extension(n) => n.insert(src, path, value)?,
            Node::Leaf(n) => n.insert(path, value)?,
        };
        if let Some(new_node) = new_node {
            *self = new_node;
        }
        Ok(())
    }

    /// Removes a value from the subtree originating from this node given its path.
    /// Returns a bool indicating if the subtree is now empty, and the removed
    /// value if the path was bound in the subtree.
    pub fn remove(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
    ) -> Result<(bool, Option<Vec<u8>>), TrieError> {
        let (new_root, value) = match self {
            Node::Branch(n) => n.remove(src, path),
            Node::Extension(n) => n.remove(src, path),
            Node::Leaf(n) => n.remove(path),
        }?;
        match new_root {
            Some(NodeRemoveResult::New(new_root)) => {
                *self = new_root;
                Ok((false, value))
            }
            Some(NodeRemoveResult::Mutated) => Ok((false, value)),
            None => Ok((true, value)),
        }
    }

    /// Computes the node's hash from its current body.
    pub fn compute_hash(&self) -> NodeHash {
        NodeHash::from_encoded(&self.encode_to_vec())
    }
}

/// Used as return type for `Node` remove operations that may resolve into either:
/// - a mutation of the `Node`
/// - a new `Node` replacing it (a collapse or merge transition)
///
/// `None` in the surrounding `Option` means the whole subtree is gone.
pub enum NodeRemoveResult {
    Mutated,
    New(Node),
}
