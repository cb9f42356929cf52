use std::mem;

use super::{BranchNode, LeafNode, Node, NodeRef, NodeRemoveResult};
use crate::{db::NodeSource, error::TrieError, nibbles::Nibbles};

/// A shared non-terminal path segment with exactly one child, which is
/// always a branch: a child leaf or extension would have been merged into
/// this node's prefix instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionNode {
    pub prefix: Nibbles,
    pub child: NodeRef,
}

impl ExtensionNode {
    pub fn new(prefix: Nibbles, child: NodeRef) -> Self {
        Self { prefix, child }
    }

    /// Retrieves a value from the subtree if `prefix` is a prefix of the path.
    pub fn get(&self, src: &NodeSource, path: Nibbles) -> Result<Option<Vec<u8>>, TrieError> {
        let mut path = path;
        if path.skip_prefix(&self.prefix) {
            self.child.resolve(src)?.get(src, path)
        } else {
            Ok(None)
        }
    }

    /// Stores the value at the given path. When the path diverges inside the
    /// prefix, the extension splits: an optional shorter extension over the
    /// shared part, then a branch holding the original child on one side and
    /// the new leaf (or the branch value) on the other.
    pub fn insert(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<Option<Node>, TrieError> {
        let common = path.count_prefix(&self.prefix);
        if common == self.prefix.len() {
            self.child
                .resolve_mut(src)?
                .insert(src, path.offset(common), value)?;
            return Ok(None);
        }

        let prefix_rest = self.prefix.offset(common);
        let original_side: NodeRef = if prefix_rest.len() == 1 {
            // the branch consumes the diverging nibble; the child wires in directly
            mem::take(&mut self.child)
        } else {
            Node::from(ExtensionNode::new(
                prefix_rest.offset(1),
                mem::take(&mut self.child),
            ))
            .into()
        };

        let mut branch = BranchNode::default();
        branch.choices[prefix_rest.at(0) as usize] = original_side;
        branch.attach_leaf(path.offset(common), value);

        Ok(Some(if common > 0 {
            ExtensionNode::new(path.slice(0, common), Node::from(branch).into()).into()
        } else {
            branch.into()
        }))
    }

    /// Removes a value from the subtree. If the child branch collapsed into
    /// a leaf or extension, its path folds into this node's prefix and the
    /// intermediate node is dropped.
    pub fn remove(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
    ) -> Result<(Option<NodeRemoveResult>, Option<Vec<u8>>), TrieError> {
        let mut path = path;
        if !path.skip_prefix(&self.prefix) {
            return Ok((Some(NodeRemoveResult::Mutated), None));
        }

        let child = self.child.resolve_mut(src)?;
        let (child_empty, value) = child.remove(src, path)?;
        if value.is_none() {
            return Ok((Some(NodeRemoveResult::Mutated), None));
        }
        if child_empty {
            return Ok((None, value));
        }

        let result = match child {
            Node::Branch(_) => NodeRemoveResult::Mutated,
            Node::Extension(inner) => NodeRemoveResult::New(
                ExtensionNode::new(
                    self.prefix.concat(&inner.prefix),
                    mem::take(&mut inner.child),
                )
                .into(),
            ),
            Node::Leaf(leaf) => NodeRemoveResult::New(
                LeafNode::new(
                    self.prefix.concat(&leaf.partial),
                    mem::take(&mut leaf.value),
                )
                .into(),
            ),
        };
        Ok((Some(result), value))
    }

    /// An extension with an empty path cannot be encoded and must never be
    /// produced by the rewrite transitions.
    pub(crate) fn validate_shape(&self) -> Result<(), TrieError> {
        if self.prefix.is_empty() {
            return Err(TrieError::InvariantViolation("extension with an empty path"));
        }
        Ok(())
    }
}
