use ethereum_types::H256;

use crate::{
    EMPTY_TRIE_HASH,
    db::NodeSource,
    error::TrieError,
    nibbles::Nibbles,
    node::{BranchNode, ExtensionNode, LeafNode, Node, NodeRef},
    node_hash::NodeHash,
};

/// Position of the walk when a callback fires.
pub struct VisitContext {
    /// Nibble path from the root to the visited node (its parent path plus
    /// any branch slot already descended into).
    pub path: Nibbles,
    /// Nodes between the root and the visited node.
    pub depth: usize,
    /// Hint that leaf values under this tree are account payloads. The walk
    /// itself never decodes them.
    pub expect_accounts: bool,
}

/// Consumer driven by a depth-first walk over a committed tree.
///
/// Branch children are visited in slot order, 0 through 15. A node that
/// cannot be resolved is reported through
/// [`visit_missing_node`](Self::visit_missing_node) and ends the walk without
/// surfacing an error; walks over partially synced trees are expected.
pub trait TrieVisitor {
    fn visit_tree(&mut self, _root: H256, _ctx: &VisitContext) {}
    fn visit_branch(&mut self, _node: &BranchNode, _ctx: &VisitContext) {}
    fn visit_extension(&mut self, _node: &ExtensionNode, _ctx: &VisitContext) {}
    fn visit_leaf(&mut self, _node: &LeafNode, _ctx: &VisitContext) {}
    fn visit_missing_node(&mut self, _hash: H256, _ctx: &VisitContext) {}
}

pub(crate) fn walk(
    src: &NodeSource,
    root: H256,
    visitor: &mut dyn TrieVisitor,
    expect_accounts: bool,
) -> Result<(), TrieError> {
    let mut ctx = VisitContext {
        path: Nibbles::default(),
        depth: 0,
        expect_accounts,
    };
    visitor.visit_tree(root, &ctx);
    if root == *EMPTY_TRIE_HASH {
        return Ok(());
    }

    let root_ref = NodeRef::from(NodeHash::from(root));
    walk_ref(src, &root_ref, visitor, &mut ctx)?;
    Ok(())
}

/// Returns whether the walk should keep going; a missing node stops it.
fn walk_ref(
    src: &NodeSource,
    node_ref: &NodeRef,
    visitor: &mut dyn TrieVisitor,
    ctx: &mut VisitContext,
) -> Result<bool, TrieError> {
    let node = match node_ref.get_node(src) {
        Ok(Some(node)) => node,
        Ok(None) | Err(TrieError::NodeMissing(_)) => {
            visitor.visit_missing_node(node_ref.compute_hash().finalize(), ctx);
            return Ok(false);
        }
        Err(err) => return Err(err),
    };

    match node.as_ref() {
        Node::Branch(branch) => {
            visitor.visit_branch(branch, ctx);
            for (choice, child) in branch.choices.iter().enumerate() {
                if !child.is_valid() {
                    continue;
                }
                ctx.path.append(choice as u8);
                ctx.depth += 1;
                let keep_going = walk_ref(src, child, visitor, ctx)?;
                ctx.depth -= 1;
                let len = ctx.path.len();
                ctx.path.truncate(len - 1);
                if !keep_going {
                    return Ok(false);
                }
            }
        }
        Node::Extension(extension) => {
            visitor.visit_extension(extension, ctx);
            let parent_len = ctx.path.len();
            ctx.path.extend(&extension.prefix);
            ctx.depth += 1;
            let keep_going = walk_ref(src, &extension.child, visitor, ctx)?;
            ctx.depth -= 1;
            ctx.path.truncate(parent_len);
            if !keep_going {
                return Ok(false);
            }
        }
        Node::Leaf(leaf) => visitor.visit_leaf(leaf, ctx),
    }
    Ok(true)
}
