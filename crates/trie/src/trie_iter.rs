use std::cmp::Ordering;

use crate::{
    Trie,
    db::NodeSource,
    error::TrieError,
    nibbles::Nibbles,
    node::{Node, NodeRef},
};

/// Depth-first iterator over the trie, yielding nodes in lexicographic key
/// order.
pub struct TrieIterator {
    src: NodeSource,
    // The stack contains the current traversed path and the next node to be traversed.
    // It proactively stacks all children of a branch after consuming it to reduce
    // accesses to the backing store. Elements are pushed in the reverse order they
    // will be popped.
    stack: Vec<(Nibbles, NodeRef)>,
}

impl TrieIterator {
    pub(crate) fn new(trie: Trie) -> Self {
        let mut stack = Vec::new();
        if trie.root.is_valid() {
            stack.push((Nibbles::default(), trie.root.clone()));
        }
        Self {
            src: trie.src,
            stack,
        }
    }

    /// Position the iterator on the first leaf >= key.
    /// Manually pushes the correct nodes to the stack so iteration doesn't
    /// rewind back to left children of a traversed branch node.
    pub fn advance(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let Some((root_path, root_ref)) = self.stack.pop() else {
            return Ok(());
        };

        let mut node_ref = root_ref;
        let mut prefix_nibbles = root_path;
        let mut target_nibbles = Nibbles::from_bytes(key);

        loop {
            if target_nibbles.is_empty() || !node_ref.is_valid() {
                break;
            }
            let Some(next_node) = node_ref.get_node(&self.src).ok().flatten() else {
                self.stack.clear();
                break;
            };
            match next_node.as_ref() {
                Node::Branch(branch_node) => {
                    // We need to skip the branch node itself to avoid iterating over left
                    // uncles of our key. Instead, we add explicitly the children that can't
                    // lead to our leaf but are greater lexicographically, and then explore,
                    // if valid, the child that leads to a prefix of `key`.
                    let choice = target_nibbles.at(0) as usize;
                    target_nibbles = target_nibbles.offset(1);
                    for i in (choice + 1..16).rev() {
                        let child = &branch_node.choices[i];
                        if child.is_valid() {
                            self.stack
                                .push((prefix_nibbles.append_new(i as u8), child.clone()));
                        }
                    }
                    node_ref = branch_node.choices[choice].clone();
                    prefix_nibbles = prefix_nibbles.append_new(choice as u8);
                }
                Node::Extension(extension_node) => {
                    let prefix = &extension_node.prefix;
                    match target_nibbles.compare_prefix(prefix) {
                        Ordering::Greater => {
                            // Path is lesser than `key`, ignore it and finish iteration.
                            break;
                        }
                        Ordering::Less => {
                            // Path is greater than `key`, we need to iterate it.
                            self.stack.push((prefix_nibbles.clone(), node_ref));
                            break;
                        }
                        Ordering::Equal => {
                            // This is a prefix of `key`, we'll need to check the child,
                            // but not iterate the node itself again.
                            target_nibbles = target_nibbles.offset(prefix.len());
                            prefix_nibbles.extend(&extension_node.prefix);
                            node_ref = extension_node.child.clone();
                        }
                    }
                }
                Node::Leaf(leaf) => {
                    let prefix = &leaf.partial;
                    match target_nibbles.compare_prefix(prefix) {
                        Ordering::Greater => {} // Leaf is less than `key`, ignore it.
                        _ => {
                            // Leaf is greater than or equal to `key`, so it's in range for
                            // iteration.
                            self.stack.push((prefix_nibbles.clone(), node_ref.clone()));
                        }
                    }
                    // We reached the bottom, so every other path has to be covered.
                    break;
                }
            }
        }

        Ok(())
    }
}

impl Iterator for TrieIterator {
    type Item = (Nibbles, Node);

    fn next(&mut self) -> Option<Self::Item> {
        // Fetch the last node in the stack
        let (mut path, next_node_ref) = self.stack.pop()?;
        let next_node = next_node_ref.get_node(&self.src).ok().flatten()?;
        match next_node.as_ref() {
            Node::Branch(branch_node) => {
                // Add all children to the stack (in reverse order so we process the
                // first child first)
                for (choice, child) in branch_node.choices.iter().enumerate().rev() {
                    if child.is_valid() {
                        let mut child_path = path.clone();
                        child_path.append(choice as u8);
                        self.stack.push((child_path, child.clone()))
                    }
                }
            }
            Node::Extension(extension_node) => {
                // Update path
                path.extend(&extension_node.prefix);
                // Add child to the stack
                self.stack
                    .push((path.clone(), extension_node.child.clone()));
            }
            Node::Leaf(leaf) => {
                path.extend(&leaf.partial);
            }
        }
        Some((path, next_node.as_ref().clone()))
    }
}

impl TrieIterator {
    /// Yields the key/value bindings, keys rebuilt from the traversed path.
    pub fn content(self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> {
        self.filter_map(|(path, node)| match node {
            Node::Branch(branch_node) => (!branch_node.value.is_empty())
                .then(|| (path.to_bytes(), branch_node.value.clone())),
            Node::Extension(_) => None,
            Node::Leaf(leaf_node) => Some((path.to_bytes(), leaf_node.value)),
        })
    }
}
