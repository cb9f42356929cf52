use canopy_rlp::error::RLPDecodeError;
use ethereum_types::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    /// A referenced node could not be decoded.
    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    /// A referenced node is absent from both the node cache and the backing store.
    #[error("Node {0:#x} missing from cache and backing store")]
    NodeMissing(H256),
    /// A hex-prefix encoded path uses reserved flag bits or inconsistent parity.
    #[error("Malformed hex-prefix path")]
    MalformedPath,
    /// Commit invoked on a trie that was opened read-only.
    #[error("Commits are disabled for this trie")]
    CommitsDisabled,
    /// Delete of an absent key, surfaced only by the strict removal form.
    #[error("Delete of a key that is not present in the trie")]
    MissingForDelete,
    /// A reader observed the root it is bound to while a writer was rewriting it.
    #[error("Concurrent mutation of root {0:#x}")]
    ConcurrentMutation(H256),
    /// Ownership bookkeeping broke during a tree rewrite.
    #[error("Reference count underflow: {0}")]
    RefCountUnderflow(&'static str),
    /// A rewrite transition required mutating a node that was already sealed.
    #[error("Mutation of a sealed node: {0}")]
    SealedMutation(&'static str),
    /// The tree reached a shape the mutation algorithm must never produce.
    #[error("Invariant violation: {0}")]
    InvariantViolation(&'static str),
    /// One or more parallel branch commits failed.
    #[error("Parallel commit produced {} failure(s)", .0.len())]
    AggregatedCommit(Vec<TrieError>),
    /// The sealed-node queue drained short of the number of sealed nodes.
    #[error("Commit queue drained short")]
    CommitRace,
    /// Backing store failure.
    #[error("Database error: {0}")]
    Db(String),
}
