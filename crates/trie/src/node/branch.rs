use std::{array, mem};

use super::{ExtensionNode, LeafNode, Node, NodeRef, NodeRemoveResult};
use crate::{db::NodeSource, error::TrieError, nibbles::Nibbles};

/// A 16-way node. Each child slot is empty, a hash reference, or an inlined
/// child; `value` (empty when absent) binds the key that ends at this node.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    pub choices: [NodeRef; 16],
    pub value: Vec<u8>,
}

impl Default for BranchNode {
    fn default() -> Self {
        Self {
            choices: array::from_fn(|_| NodeRef::default()),
            value: Vec::new(),
        }
    }
}

impl BranchNode {
    pub fn new(choices: [NodeRef; 16], value: Vec<u8>) -> Self {
        Self { choices, value }
    }

    /// Child slots and the value slot currently occupied.
    pub(crate) fn occupied_slots(&self) -> usize {
        self.choices.iter().filter(|choice| choice.is_valid()).count()
            + usize::from(!self.value.is_empty())
    }

    /// Whether the branch keeps a valid shape (at least two occupied slots)
    /// after one occupied slot is cleared. When it would not, the removal
    /// path collapses the branch instead of clearing in place.
    pub fn is_valid_with_one_less(&self) -> bool {
        self.occupied_slots() >= 3
    }

    pub(crate) fn validate_shape(&self) -> Result<(), TrieError> {
        if self.occupied_slots() < 2 {
            return Err(TrieError::InvariantViolation(
                "branch with fewer than two occupied slots",
            ));
        }
        Ok(())
    }

    /// Wires a fresh leaf below this branch: at the slot named by the first
    /// nibble of `rest`, or into the value slot when `rest` is empty.
    pub(crate) fn attach_leaf(&mut self, rest: Nibbles, value: Vec<u8>) {
        match rest.first() {
            None => self.value = value,
            Some(choice) => {
                self.choices[choice as usize] =
                    Node::from(LeafNode::new(rest.offset(1), value)).into();
            }
        }
    }

    /// Retrieves a value from the subtree originating from this node given its path
    pub fn get(&self, src: &NodeSource, path: Nibbles) -> Result<Option<Vec<u8>>, TrieError> {
        match path.first() {
            None => Ok((!self.value.is_empty()).then(|| self.value.clone())),
            Some(choice) => {
                let child = &self.choices[choice as usize];
                if !child.is_valid() {
                    return Ok(None);
                }
                child.resolve(src)?.get(src, path.offset(1))
            }
        }
    }

    /// Stores the value at the given path, rewriting the value slot when the
    /// path ends here and descending (or growing a leaf) otherwise.
    pub fn insert(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<(), TrieError> {
        match path.first() {
            None => self.value = value,
            Some(choice) => {
                let slot = &mut self.choices[choice as usize];
                if slot.is_valid() {
                    slot.resolve_mut(src)?.insert(src, path.offset(1), value)?;
                } else {
                    *slot = Node::from(LeafNode::new(path.offset(1), value)).into();
                }
            }
        }
        Ok(())
    }

    /// Removes a value from the subtree. A branch left invalid with one slot
    /// less collapses: onto its own value as a leaf, or onto its single
    /// surviving child with the child slot nibble folded into that child's
    /// path.
    pub fn remove(
        &mut self,
        src: &NodeSource,
        path: Nibbles,
    ) -> Result<(Option<NodeRemoveResult>, Option<Vec<u8>>), TrieError> {
        let value = match path.first() {
            None => {
                if self.value.is_empty() {
                    return Ok((Some(NodeRemoveResult::Mutated), None));
                }
                let keeps_shape = self.is_valid_with_one_less();
                let removed = mem::take(&mut self.value);
                if keeps_shape {
                    return Ok((Some(NodeRemoveResult::Mutated), Some(removed)));
                }
                removed
            }
            Some(choice) => {
                let keeps_shape = self.is_valid_with_one_less();
                let slot = &mut self.choices[choice as usize];
                if !slot.is_valid() {
                    return Ok((Some(NodeRemoveResult::Mutated), None));
                }
                let (child_empty, removed) =
                    slot.resolve_mut(src)?.remove(src, path.offset(1))?;
                let Some(removed) = removed else {
                    return Ok((Some(NodeRemoveResult::Mutated), None));
                };
                if !child_empty {
                    return Ok((Some(NodeRemoveResult::Mutated), Some(removed)));
                }
                *slot = NodeRef::default();
                if keeps_shape {
                    return Ok((Some(NodeRemoveResult::Mutated), Some(removed)));
                }
                removed
            }
        };

        Ok((Some(self.collapse(src)?), Some(value)))
    }

    /// Rebuilds the branch around its single surviving slot.
    fn collapse(&mut self, src: &NodeSource) -> Result<NodeRemoveResult, TrieError> {
        if !self.value.is_empty() {
            return Ok(NodeRemoveResult::New(
                LeafNode::new(Nibbles::default(), mem::take(&mut self.value)).into(),
            ));
        }

        let Some(choice) = self.choices.iter().position(|slot| slot.is_valid()) else {
            return Err(TrieError::RefCountUnderflow(
                "branch collapse found no surviving slot",
            ));
        };
        let slot = &mut self.choices[choice];
        let child = slot.resolve(src)?;

        let new_node: Node = match child.as_ref() {
            Node::Branch(_) => {
                ExtensionNode::new(Nibbles::single(choice as u8), mem::take(slot)).into()
            }
            Node::Extension(inner) => {
                let mut prefix = inner.prefix.clone();
                prefix.prepend(choice as u8);
                ExtensionNode::new(prefix, inner.child.clone()).into()
            }
            Node::Leaf(leaf) => {
                let mut partial = leaf.partial.clone();
                partial.prepend(choice as u8);
                LeafNode::new(partial, leaf.value.clone()).into()
            }
        };
        Ok(NodeRemoveResult::New(new_node))
    }
}
