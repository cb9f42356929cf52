use std::mem;

use super::{BranchNode, ExtensionNode, Node, NodeRemoveResult};
use crate::{error::TrieError, nibbles::Nibbles};

/// Terminal node mapping the key whose nibble form is the concatenation of
/// all ancestor path fragments and `partial` to `value`.
///
/// `partial` may be empty (a branch collapsed onto its own value); `value`
/// never is, because storing an empty value is a removal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafNode {
    pub partial: Nibbles,
    pub value: Vec<u8>,
}

impl LeafNode {
    pub fn new(partial: Nibbles, value: Vec<u8>) -> Self {
        Self { partial, value }
    }

    /// Retrieves the value held by this node if the path matches exactly.
    pub fn get(&self, path: Nibbles) -> Result<Option<Vec<u8>>, TrieError> {
        if path == self.partial {
            Ok(Some(self.value.clone()))
        } else {
            Ok(None)
        }
    }

    /// Stores the value at the given path. An exact hit overwrites in place;
    /// a diverging path splits the leaf into a branch at the divergence,
    /// below an extension covering the shared prefix if there is one.
    pub fn insert(&mut self, path: Nibbles, value: Vec<u8>) -> Result<Option<Node>, TrieError> {
        if path == self.partial {
            if self.value != value {
                self.value = value;
            }
            return Ok(None);
        }

        let common = path.count_prefix(&self.partial);
        let mut branch = BranchNode::default();
        branch.attach_leaf(self.partial.offset(common), mem::take(&mut self.value));
        branch.attach_leaf(path.offset(common), value);

        Ok(Some(if common > 0 {
            ExtensionNode::new(path.slice(0, common), Node::from(branch).into()).into()
        } else {
            branch.into()
        }))
    }

    /// Removes the value if the path matches exactly, emptying the subtree.
    pub fn remove(
        &mut self,
        path: Nibbles,
    ) -> Result<(Option<NodeRemoveResult>, Option<Vec<u8>>), TrieError> {
        if path == self.partial {
            Ok((None, Some(mem::take(&mut self.value))))
        } else {
            Ok((Some(NodeRemoveResult::Mutated), None))
        }
    }
}
