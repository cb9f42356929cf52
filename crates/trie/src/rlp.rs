// RLP encoding and decoding for trie nodes. The same encoding feeds hash
// computation, child-reference inlining and persistence, so it must stay
// deterministic.
use canopy_rlp::{
    decode::decode_bytes,
    encode::{RLPEncode, encode_length, list_length},
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use ethereum_types::H256;

use crate::{
    error::TrieError,
    nibbles::Nibbles,
    node::{BranchNode, ExtensionNode, LeafNode, Node},
    node_hash::NodeHash,
};

impl RLPEncode for BranchNode {
    /// 17 items: 16 child references followed by the value (empty if absent).
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        let value_len = <[u8] as RLPEncode>::length(&self.value);
        let payload_len = self.choices.iter().fold(value_len, |acc, child| {
            acc + child.compute_hash_ref().length()
        });

        encode_length(payload_len, buf);
        for child in self.choices.iter() {
            child.compute_hash_ref().encode(buf);
        }
        <[u8] as RLPEncode>::encode(&self.value, buf);
    }

    fn length(&self) -> usize {
        let value_len = <[u8] as RLPEncode>::length(&self.value);
        let payload_len = self.choices.iter().fold(value_len, |acc, child| {
            acc + child.compute_hash_ref().length()
        });
        list_length(payload_len)
    }
}

impl RLPEncode for ExtensionNode {
    /// Two items: hex-prefix encoded path, then the child reference.
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_bytes(&self.prefix.encode_compact(false))
            .encode_field(self.child.compute_hash_ref())
            .finish();
    }

    fn length(&self) -> usize {
        let compact = self.prefix.encode_compact(false);
        let payload_len =
            RLPEncode::length(compact.as_slice()) + self.child.compute_hash_ref().length();
        list_length(payload_len)
    }
}

impl RLPEncode for LeafNode {
    /// Two items: hex-prefix encoded path with the leaf flag, then the value.
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_bytes(&self.partial.encode_compact(true))
            .encode_bytes(&self.value)
            .finish();
    }

    fn length(&self) -> usize {
        let compact = self.partial.encode_compact(true);
        let payload_len =
            RLPEncode::length(compact.as_slice()) + <[u8] as RLPEncode>::length(&self.value);
        list_length(payload_len)
    }
}

impl RLPEncode for Node {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Node::Branch(n) => n.encode(buf),
            Node::Extension(n) => n.encode(buf),
            Node::Leaf(n) => n.encode(buf),
        }
    }

    fn length(&self) -> usize {
        match self {
            Node::Branch(n) => n.length(),
            Node::Extension(n) => n.length(),
            Node::Leaf(n) => n.length(),
        }
    }
}

impl Node {
    /// Decodes a node, recognizing the variant by arity (2 vs 17 items) and
    /// by the flag bit of the first item's hex-prefix.
    pub fn decode(rlp: &[u8]) -> Result<Self, TrieError> {
        let mut items: Vec<&[u8]> = Vec::with_capacity(17);
        let mut decoder = Decoder::new(rlp).map_err(TrieError::RLPDecode)?;
        let mut item;
        while !decoder.is_done() && items.len() < 18 {
            (item, decoder) = decoder.get_encoded_item()?;
            items.push(item);
        }

        match items.len() {
            // Leaf or Extension Node
            2 => {
                let (compact, _) = decode_bytes(items[0])?;
                let (path, is_leaf) = Nibbles::decode_compact(compact)?;
                if is_leaf {
                    let (value, _) = decode_bytes(items[1])?;
                    Ok(LeafNode::new(path, value.to_vec()).into())
                } else {
                    if path.is_empty() {
                        return Err(RLPDecodeError::Custom(
                            "extension node with an empty path".to_string(),
                        )
                        .into());
                    }
                    Ok(ExtensionNode::new(path, decode_child(items[1])?.into()).into())
                }
            }
            // Branch Node
            17 => {
                let mut branch = BranchNode::default();
                for (choice, item) in items[..16].iter().enumerate() {
                    branch.choices[choice] = decode_child(item)?.into();
                }
                let (value, _) = decode_bytes(items[16])?;
                branch.value = value.to_vec();
                Ok(branch.into())
            }
            n => Err(RLPDecodeError::Custom(format!(
                "invalid item count for node, expected 2 or 17, got {n}"
            ))
            .into()),
        }
    }
}

/// Decodes a child reference: a 32-byte string is a hash, the empty string an
/// absent slot, and anything shorter than 32 bytes an inlined child kept
/// verbatim.
fn decode_child(rlp: &[u8]) -> Result<NodeHash, TrieError> {
    match decode_bytes(rlp) {
        Ok((hash, rest)) if rest.is_empty() && hash.len() == 32 => {
            Ok(NodeHash::Hashed(H256::from_slice(hash)))
        }
        Ok(([], rest)) if rest.is_empty() => Ok(NodeHash::default()),
        _ if rlp.len() < 32 => Ok(NodeHash::from_encoded(rlp)),
        _ => Err(RLPDecodeError::Custom("invalid child reference".to_string()).into()),
    }
}
