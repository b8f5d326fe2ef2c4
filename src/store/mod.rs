//! Durable key-value backing store
//!
//! The trie only needs point lookups, but stores keep keys ordered so that
//! maintenance tools can scan ranges.

mod blob;
mod file_store;
mod memory;

pub use blob::{Blob, BlobEncoding};
pub use file_store::FileStore;
pub use memory::MemoryStore;

use crate::Result;

/// A single operation inside an atomic write batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete { key: key.into() }
    }
}

/// Ordered, durable key → bytes store
pub trait KvStore: Send + Sync {
    /// Get a value by key, `None` if absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Check if a key exists
    fn contains(&self, key: &[u8]) -> Result<bool>;

    /// Apply all operations or none of them
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Keys starting with `prefix`, in key order, without reading values
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Number of live keys
    fn len(&self) -> usize;

    /// Make every accepted write durable
    fn sync(&self) -> Result<()>;

    /// Reclaim space taken by overwritten and deleted entries
    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_batch(vec![BatchOp::put(key, value)])
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write_batch(vec![BatchOp::delete(key)])
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
