//! Nibble paths and their compact (hex-prefix) encoding

use super::DecodeError;

/// Split each byte into its high and low nibble
pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Pack nibbles back into bytes. Full keys always have an even length.
pub fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

/// Length of the shared prefix of two nibble paths
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

const LEAF_FLAG: u8 = 0x20;
const ODD_FLAG: u8 = 0x10;

/// Compact encoding for leaf and extension paths
///
/// The high nibble of the first byte carries flags: `0x2` marks a leaf,
/// `0x1` an odd number of nibbles. An odd path stores its first nibble in
/// the low half of the flag byte; an even path pads it with zero.
///
/// - `[0, 1, 2, 3]` as an extension becomes `[0x00, 0x01, 0x23]`
/// - `[1, 2, 3]` as a leaf becomes `[0x31, 0x23]`
pub fn compact_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let mut compact = Vec::with_capacity(nibbles.len() / 2 + 1);
    let flags = if is_leaf { LEAF_FLAG } else { 0 };

    let rest = if nibbles.len() % 2 == 1 {
        compact.push(flags | ODD_FLAG | nibbles[0]);
        &nibbles[1..]
    } else {
        compact.push(flags);
        nibbles
    };

    for pair in rest.chunks(2) {
        compact.push((pair[0] << 4) | pair[1]);
    }
    compact
}

/// Inverse of [`compact_encode`], returning the nibbles and the leaf flag
pub fn compact_decode(compact: &[u8]) -> Result<(Vec<u8>, bool), DecodeError> {
    let (&first, rest) = compact
        .split_first()
        .ok_or(DecodeError::InvalidPath("empty path encoding"))?;

    if first & 0xc0 != 0 {
        return Err(DecodeError::InvalidPath("unknown flag bits"));
    }
    let is_leaf = first & LEAF_FLAG != 0;
    let is_odd = first & ODD_FLAG != 0;

    let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
    if is_odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(DecodeError::InvalidPath("non-zero padding nibble"));
    }
    nibbles.extend(bytes_to_nibbles(rest));

    Ok((nibbles, is_leaf))
}
