use bytes::BufMut;
use canopy_rlp::{constants::RLP_NULL, encode::RLPEncode};
use ethereum_types::H256;
use keccak_hash::keccak;

/// The reference a parent holds to a child node.
///
/// Nodes whose encoding reaches 32 bytes are referenced by the keccak hash of
/// that encoding; strictly smaller nodes are carried inline, embedded verbatim
/// in the parent's own encoding. The inlining rule is mandatory: it is part of
/// the commitment scheme, not an optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHash {
    Hashed(H256),
    /// Encoded node bytes (a full RLP item) and their length, always < 32.
    Inline(([u8; 31], u8)),
}

impl NodeHash {
    /// Obtain the node reference for a node encoding, applying the
    /// 32-byte inlining threshold.
    pub fn from_encoded(encoded: &[u8]) -> NodeHash {
        if encoded.len() < 32 {
            let mut buffer = [0u8; 31];
            buffer[..encoded.len()].copy_from_slice(encoded);
            NodeHash::Inline((buffer, encoded.len() as u8))
        } else {
            NodeHash::Hashed(keccak(encoded))
        }
    }

    /// Converts the reference into a 32-byte hash, hashing inline contents.
    /// Used at the root, where the commitment is always the full-width hash.
    pub fn finalize(self) -> H256 {
        match self {
            NodeHash::Hashed(hash) => hash,
            NodeHash::Inline((data, len)) => keccak(&data[..len as usize]),
        }
    }

    /// The empty reference is not valid: it marks an absent child slot.
    pub fn is_valid(&self) -> bool {
        !matches!(self, NodeHash::Inline((_, 0)))
    }
}

impl Default for NodeHash {
    fn default() -> Self {
        NodeHash::Inline(([0; 31], 0))
    }
}

impl From<H256> for NodeHash {
    fn from(value: H256) -> Self {
        NodeHash::Hashed(value)
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            NodeHash::Hashed(hash) => hash.as_bytes(),
            NodeHash::Inline((data, len)) => &data[..*len as usize],
        }
    }
}

impl RLPEncode for NodeHash {
    /// Hashed references encode as a 32-byte string; inline references splice
    /// their already-encoded node in verbatim; absent slots encode as the
    /// empty string.
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            NodeHash::Hashed(hash) => hash.encode(buf),
            NodeHash::Inline((_, 0)) => buf.put_u8(RLP_NULL),
            NodeHash::Inline((encoded, len)) => buf.put_slice(&encoded[..*len as usize]),
        }
    }

    fn length(&self) -> usize {
        match self {
            NodeHash::Hashed(_) => 33,
            NodeHash::Inline((_, 0)) => 1,
            NodeHash::Inline((_, len)) => *len as usize,
        }
    }
}
