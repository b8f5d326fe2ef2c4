//! Trie node types

use crate::model::Hash;

/// Children of a branch, one slot per nibble
pub type Children = Box<[Option<NodeRef>; 16]>;

/// How a node points at a child
///
/// Small children are embedded in the parent's encoding, larger ones are
/// stored on their own and referenced by content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRef {
    Hash(Hash),
    Inline(Box<Node>),
}

/// A node in the Merkle-Patricia trie
///
/// Paths are nibble sequences (one value 0..=15 per element). Nodes are
/// immutable once built; edits produce new nodes along the touched path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Node {
    /// Absence of any key
    #[default]
    Empty,
    /// The rest of a key and its value
    Leaf { path: Vec<u8>, value: Vec<u8> },
    /// A non-empty path shared by every key below `child`, which is a branch
    Extension { path: Vec<u8>, child: NodeRef },
    /// Sixteen-way fan-out plus the value of the key ending here
    Branch {
        children: Children,
        value: Option<Vec<u8>>,
    },
}

/// A branch slot array with nothing in it
pub fn empty_children() -> Children {
    Box::new(std::array::from_fn(|_| None))
}

impl Node {
    /// Create a leaf node
    pub fn leaf(path: Vec<u8>, value: Vec<u8>) -> Self {
        Node::Leaf { path, value }
    }

    /// Check if this node is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Child references in nibble order
    pub fn children(&self) -> Vec<&NodeRef> {
        match self {
            Node::Extension { child, .. } => vec![child],
            Node::Branch { children, .. } => children.iter().flatten().collect(),
            Node::Empty | Node::Leaf { .. } => Vec::new(),
        }
    }

    /// Hashes of every separately stored node this one points at, looking
    /// through inline children
    pub fn hash_refs(&self, out: &mut Vec<Hash>) {
        for child in self.children() {
            match child {
                NodeRef::Hash(hash) => out.push(*hash),
                NodeRef::Inline(node) => node.hash_refs(out),
            }
        }
    }
}
