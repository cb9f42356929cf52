use std::cmp;

use smallvec::SmallVec;

use crate::error::TrieError;

/// Leaf/extension discriminator in the first byte of a hex-prefix encoded path.
const HEX_PREFIX_LEAF_FLAG: u8 = 0x20;
/// Odd-length marker in the first byte of a hex-prefix encoded path.
const HEX_PREFIX_ODD_FLAG: u8 = 0x10;

/// A sequence of nibbles (half-bytes), one nibble per element.
///
/// Keys up to 32 bytes (64 nibbles, the common case of hashed keys) live on
/// the stack; longer paths spill to the heap.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nibbles {
    data: SmallVec<[u8; 64]>,
}

impl Nibbles {
    /// Splits incoming bytes into nibbles, high nibble first.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = SmallVec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }
        Self { data }
    }

    /// Builds a path from raw nibble values, each in `[0, 15]`.
    pub fn from_nibbles(nibbles: &[u8]) -> Self {
        debug_assert!(nibbles.iter().all(|nibble| *nibble < 16));
        Self {
            data: SmallVec::from_slice(nibbles),
        }
    }

    /// A path holding a single nibble.
    pub fn single(nibble: u8) -> Self {
        Self::from_nibbles(&[nibble])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the nibble at the given index; panics if out of range.
    #[inline]
    pub fn at(&self, i: usize) -> u8 {
        self.data[i]
    }

    /// Returns the first nibble, if any.
    #[inline]
    pub fn first(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Returns the nibbles after the given offset.
    pub fn offset(&self, offset: usize) -> Nibbles {
        self.slice(offset, self.len())
    }

    /// Returns the nibbles between the start and end indexes.
    pub fn slice(&self, start: usize, end: usize) -> Nibbles {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            data: SmallVec::from_slice(&self.data[start..end]),
        }
    }

    /// Returns the shared nibble count between self and other, from the start.
    pub fn count_prefix(&self, other: &Nibbles) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// If `prefix` is a prefix of self, drop it from the front and return
    /// true, otherwise leave self untouched and return false.
    pub fn skip_prefix(&mut self, prefix: &Nibbles) -> bool {
        if self.len() < prefix.len() || self.count_prefix(prefix) != prefix.len() {
            return false;
        }
        self.data.drain(..prefix.len());
        true
    }

    /// Compares self to another, comparing prefixes only in case of unequal lengths.
    pub fn compare_prefix(&self, other: &Nibbles) -> cmp::Ordering {
        let compare_len = self.len().min(other.len());
        self.data[..compare_len].cmp(&other.data[..compare_len])
    }

    /// Appends a nibble at the end.
    pub fn append(&mut self, nibble: u8) {
        debug_assert!(nibble < 16);
        self.data.push(nibble);
    }

    /// Returns a copy of self with the nibble added at the end.
    pub fn append_new(&self, nibble: u8) -> Nibbles {
        let mut result = self.clone();
        result.append(nibble);
        result
    }

    /// Inserts a nibble at the start.
    pub fn prepend(&mut self, nibble: u8) {
        debug_assert!(nibble < 16);
        self.data.insert(0, nibble);
    }

    /// Extends the nibbles with another list of nibbles.
    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(&other.data);
    }

    /// Shortens the path to `len` nibbles.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Concatenates self and another Nibbles returning a new Nibbles.
    pub fn concat(&self, other: &Nibbles) -> Nibbles {
        let mut result = self.clone();
        result.extend(other);
        result
    }

    /// Combines the nibbles back into bytes, two per byte. An odd trailing
    /// nibble occupies the high half of the final byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len().div_ceil(2));
        for pair in self.data.chunks(2) {
            match pair {
                [hi, lo] => bytes.push((hi << 4) | lo),
                [hi] => bytes.push(hi << 4),
                _ => unreachable!(),
            }
        }
        bytes
    }

    /// Encodes the path in hex-prefix (compact) form.
    ///
    /// The first byte packs the leaf/extension flag and the parity of the
    /// path length; odd paths carry their first nibble in its low half.
    pub fn encode_compact(&self, is_leaf: bool) -> Vec<u8> {
        let mut compact = Vec::with_capacity(self.len() / 2 + 1);
        let mut first = if is_leaf { HEX_PREFIX_LEAF_FLAG } else { 0x00 };

        let tail = if self.len() % 2 == 1 {
            first |= HEX_PREFIX_ODD_FLAG | self.data[0];
            &self.data[1..]
        } else {
            &self.data[..]
        };
        compact.push(first);

        for pair in tail.chunks_exact(2) {
            compact.push((pair[0] << 4) | pair[1]);
        }

        compact
    }

    /// Decodes a hex-prefix encoded path into the path and its leaf flag.
    ///
    /// Fails with [`TrieError::MalformedPath`] when the reserved high bits of
    /// the first byte are set, or when an even-length path carries a nonzero
    /// padding nibble.
    pub fn decode_compact(compact: &[u8]) -> Result<(Nibbles, bool), TrieError> {
        let first = *compact.first().ok_or(TrieError::MalformedPath)?;
        if first & 0xc0 != 0 {
            return Err(TrieError::MalformedPath);
        }

        let is_leaf = first & HEX_PREFIX_LEAF_FLAG != 0;
        let is_odd = first & HEX_PREFIX_ODD_FLAG != 0;
        if !is_odd && first & 0x0f != 0 {
            return Err(TrieError::MalformedPath);
        }

        let mut data = SmallVec::with_capacity(compact.len() * 2);
        if is_odd {
            data.push(first & 0x0f);
        }
        for byte in &compact[1..] {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }

        Ok((Self { data }, is_leaf))
    }
}

impl AsRef<[u8]> for Nibbles {
    /// One nibble per byte.
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn skip_prefix_true() {
        let mut a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3]);
        assert!(a.skip_prefix(&b));
        assert_eq!(a.as_ref(), &[4, 5])
    }

    #[test]
    fn skip_prefix_true_same_length() {
        let mut a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert!(a.skip_prefix(&b));
        assert!(a.is_empty());
    }

    #[test]
    fn skip_prefix_longer_prefix() {
        let mut a = Nibbles::from_nibbles(&[1, 2, 3]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert!(!a.skip_prefix(&b));
        assert_eq!(a.as_ref(), &[1, 2, 3])
    }

    #[test]
    fn skip_prefix_false() {
        let mut a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 4]);
        assert!(!a.skip_prefix(&b));
        assert_eq!(a.as_ref(), &[1, 2, 3, 4, 5])
    }

    #[test]
    fn count_prefix_all() {
        let a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert_eq!(a.count_prefix(&b), a.len());
    }

    #[test]
    fn count_prefix_partial() {
        let a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3]);
        assert_eq!(a.count_prefix(&b), b.len());
    }

    #[test]
    fn count_prefix_none() {
        let a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[2, 3, 4, 5, 6]);
        assert_eq!(a.count_prefix(&b), 0);
    }

    #[test]
    fn compare_prefix_equal() {
        let a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert_eq!(a.compare_prefix(&b), Ordering::Equal);
    }

    #[test]
    fn compare_prefix_less() {
        let a = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 4, 4, 5]);
        assert_eq!(a.compare_prefix(&b), Ordering::Less);
    }

    #[test]
    fn compare_prefix_greater() {
        let a = Nibbles::from_nibbles(&[1, 2, 4, 4, 5]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert_eq!(a.compare_prefix(&b), Ordering::Greater);
    }

    #[test]
    fn compare_prefix_equal_b_longer() {
        let a = Nibbles::from_nibbles(&[1, 2, 3]);
        let b = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert_eq!(a.compare_prefix(&b), Ordering::Equal);
    }

    #[test]
    fn from_bytes_splits_high_nibble_first() {
        let a = Nibbles::from_bytes(&[0xab, 0xcd]);
        assert_eq!(a.as_ref(), &[0xa, 0xb, 0xc, 0xd]);
    }

    #[test]
    fn to_bytes_round_trip() {
        let key = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(Nibbles::from_bytes(&key).to_bytes(), key);
    }

    // Hex-prefix vectors from the yellow paper (appendix C).
    #[test]
    fn compact_even_extension() {
        let path = Nibbles::from_nibbles(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(path.encode_compact(false), vec![0x00, 0x01, 0x23, 0x45]);
    }

    #[test]
    fn compact_odd_extension() {
        let path = Nibbles::from_nibbles(&[1, 2, 3, 4, 5]);
        assert_eq!(path.encode_compact(false), vec![0x11, 0x23, 0x45]);
    }

    #[test]
    fn compact_even_leaf() {
        let path = Nibbles::from_nibbles(&[0, 0xf, 1, 0xc, 0xb, 8]);
        assert_eq!(path.encode_compact(true), vec![0x20, 0x0f, 0x1c, 0xb8]);
    }

    #[test]
    fn compact_odd_leaf() {
        let path = Nibbles::from_nibbles(&[0xf, 1, 0xc, 0xb, 8]);
        assert_eq!(path.encode_compact(true), vec![0x3f, 0x1c, 0xb8]);
    }

    #[test]
    fn compact_round_trip() {
        for (nibbles, is_leaf) in [
            (vec![], false),
            (vec![], true),
            (vec![0xa], false),
            (vec![0xa, 0xb], true),
            (vec![1, 2, 3, 4, 5], true),
            (vec![0, 1, 2, 3, 4, 5], false),
        ] {
            let path = Nibbles::from_nibbles(&nibbles);
            let compact = path.encode_compact(is_leaf);
            let (decoded, decoded_leaf) = Nibbles::decode_compact(&compact).unwrap();
            assert_eq!(decoded, path);
            assert_eq!(decoded_leaf, is_leaf);
        }
    }

    #[test]
    fn decode_compact_rejects_reserved_bits() {
        assert!(matches!(
            Nibbles::decode_compact(&[0x40, 0x12]),
            Err(TrieError::MalformedPath)
        ));
        assert!(matches!(
            Nibbles::decode_compact(&[0x80]),
            Err(TrieError::MalformedPath)
        ));
    }

    #[test]
    fn decode_compact_rejects_nonzero_padding() {
        assert!(matches!(
            Nibbles::decode_compact(&[0x21, 0x12]),
            Err(TrieError::MalformedPath)
        ));
    }

    #[test]
    fn decode_compact_rejects_empty_input() {
        assert!(matches!(
            Nibbles::decode_compact(&[]),
            Err(TrieError::MalformedPath)
        ));
    }
}
