//! Versioned Merkle-Patricia trie
//!
//! Keys are split into nibbles and routed through leaf, extension and branch
//! nodes. Every node is addressed by the hash of its canonical encoding:
//! - Each node's hash covers its children's hashes (or inline encodings)
//! - Unchanged subtrees are shared between versions
//! - The root hash identifies the whole key/value set

pub mod codec;
pub mod nibbles;

mod cache;
mod node;
mod tree;

pub use cache::{CacheStats, FlushStats, NodeCache, StagingId};
pub use codec::DecodeError;
pub use node::{empty_children, Children, Node, NodeRef};
pub use tree::Trie;
