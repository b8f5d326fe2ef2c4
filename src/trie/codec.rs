//! Canonical node encoding
//!
//! ```text
//! node      := 0x00                                    empty
//!            | 0x01 bytes(path) bytes(value)           leaf
//!            | 0x02 bytes(path) childref               extension
//!            | 0x03 bitmap:u16le childref* optvalue    branch
//! childref  := 0x00 hash[32] | 0x01 bytes(node)
//! optvalue  := 0x00 | 0x01 bytes(value)
//! bytes(x)  := varint(len(x)) x                        (unsigned LEB128)
//! ```
//!
//! Paths use the compact nibble encoding; its leaf flag must agree with the
//! node tag. Every node has exactly one encoding, so equal nodes always
//! hash equally.

use super::nibbles::{compact_decode, compact_encode};
use super::node::{empty_children, Node, NodeRef};
use crate::model::Hash;
use thiserror::Error;

const TAG_EMPTY: u8 = 0x00;
const TAG_LEAF: u8 = 0x01;
const TAG_EXTENSION: u8 = 0x02;
const TAG_BRANCH: u8 = 0x03;

const REF_HASH: u8 = 0x00;
const REF_INLINE: u8 = 0x01;

/// Reasons a byte string is not a valid node encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unknown node tag {0:#04x}")]
    UnknownTag(u8),
    #[error("unknown child reference tag {0:#04x}")]
    UnknownRefTag(u8),
    #[error("invalid path: {0}")]
    InvalidPath(&'static str),
    #[error("invalid length prefix")]
    InvalidLength,
    #[error("invalid node: {0}")]
    InvalidNode(&'static str),
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// Encode a node
pub fn encode(node: &Node) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(node, &mut out);
    out
}

/// Content hash of a node
pub fn hash(node: &Node) -> Hash {
    Hash::digest(&encode(node))
}

/// Decode a node, rejecting anything that is not a canonical encoding
pub fn decode(bytes: &[u8]) -> Result<Node, DecodeError> {
    let mut decoder = Decoder { bytes, pos: 0 };
    let node = decoder.node()?;
    match bytes.len() - decoder.pos {
        0 => Ok(node),
        n => Err(DecodeError::TrailingBytes(n)),
    }
}

fn encode_into(node: &Node, out: &mut Vec<u8>) {
    match node {
        Node::Empty => out.push(TAG_EMPTY),
        Node::Leaf { path, value } => {
            out.push(TAG_LEAF);
            write_bytes(out, &compact_encode(path, true));
            write_bytes(out, value);
        }
        Node::Extension { path, child } => {
            out.push(TAG_EXTENSION);
            write_bytes(out, &compact_encode(path, false));
            encode_ref(child, out);
        }
        Node::Branch { children, value } => {
            out.push(TAG_BRANCH);
            let bitmap = children
                .iter()
                .enumerate()
                .filter(|(_, child)| child.is_some())
                .fold(0u16, |bits, (i, _)| bits | (1 << i));
            out.extend_from_slice(&bitmap.to_le_bytes());
            for child in children.iter().flatten() {
                encode_ref(child, out);
            }
            match value {
                None => out.push(0),
                Some(value) => {
                    out.push(1);
                    write_bytes(out, value);
                }
            }
        }
    }
}

fn encode_ref(child: &NodeRef, out: &mut Vec<u8>) {
    match child {
        NodeRef::Hash(hash) => {
            out.push(REF_HASH);
            out.extend_from_slice(hash.as_bytes());
        }
        NodeRef::Inline(node) => {
            out.push(REF_INLINE);
            write_bytes(out, &encode(node));
        }
    }
}

fn write_varint(out: &mut Vec<u8>, mut n: u64) {
    while n >= 0x80 {
        out.push((n as u8) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEnd)?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut n = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.byte()?;
            if shift == 63 && b > 1 {
                return Err(DecodeError::InvalidLength);
            }
            n |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                // A zero final group after the first is an overlong form
                if b == 0 && shift > 0 {
                    return Err(DecodeError::InvalidLength);
                }
                return Ok(n);
            }
            shift += 7;
            if shift > 63 {
                return Err(DecodeError::InvalidLength);
            }
        }
    }

    fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = usize::try_from(self.varint()?).map_err(|_| DecodeError::InvalidLength)?;
        self.take(len)
    }

    fn path(&mut self, expect_leaf: bool) -> Result<Vec<u8>, DecodeError> {
        let (path, is_leaf) = compact_decode(self.bytes()?)?;
        if is_leaf != expect_leaf {
            return Err(DecodeError::InvalidPath("leaf flag disagrees with node tag"));
        }
        Ok(path)
    }

    fn node(&mut self) -> Result<Node, DecodeError> {
        match self.byte()? {
            TAG_EMPTY => Ok(Node::Empty),
            TAG_LEAF => {
                let path = self.path(true)?;
                let value = self.bytes()?.to_vec();
                Ok(Node::Leaf { path, value })
            }
            TAG_EXTENSION => {
                let path = self.path(false)?;
                if path.is_empty() {
                    return Err(DecodeError::InvalidNode("extension with empty path"));
                }
                let child = self.child_ref()?;
                Ok(Node::Extension { path, child })
            }
            TAG_BRANCH => {
                let bits = self.take(2)?;
                let bitmap = u16::from_le_bytes([bits[0], bits[1]]);
                let mut children = empty_children();
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        *slot = Some(self.child_ref()?);
                    }
                }
                let value = match self.byte()? {
                    0 => None,
                    1 => Some(self.bytes()?.to_vec()),
                    _ => return Err(DecodeError::InvalidNode("bad branch value flag")),
                };
                Ok(Node::Branch { children, value })
            }
            tag => Err(DecodeError::UnknownTag(tag)),
        }
    }

    fn child_ref(&mut self) -> Result<NodeRef, DecodeError> {
        match self.byte()? {
            REF_HASH => {
                let bytes = self.take(Hash::LEN)?;
                Hash::from_slice(bytes)
                    .map(NodeRef::Hash)
                    .ok_or(DecodeError::UnexpectedEnd)
            }
            REF_INLINE => {
                let node = decode(self.bytes()?)?;
                if node.is_empty() {
                    return Err(DecodeError::InvalidNode("inline empty child"));
                }
                Ok(NodeRef::Inline(Box::new(node)))
            }
            tag => Err(DecodeError::UnknownRefTag(tag)),
        }
    }
}
