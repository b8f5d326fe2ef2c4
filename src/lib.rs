//! # mptdb
//!
//! A persistent, versioned, content-addressed key/value store built on a
//! Merkle-Patricia trie.
//!
//! Every committed version is identified by a 32-byte root hash. Versions
//! share unchanged subtrees, so old roots stay readable at the cost of only
//! the nodes that differ.
//!
//! ## Core Concepts
//!
//! - **Trie**: A handle on one version; edits are copy-on-write
//! - **Node cache**: Shared between handles, stages new nodes until commit
//! - **Store**: Durable ordered key/value storage for encoded nodes
//! - **Refs**: Named pointers to root hashes (`HEAD` by default)
//!
//! ## Example
//!
//! ```ignore
//! use mptdb::{Config, Database, HEAD};
//!
//! let db = Database::open("trie.db", Config::default())?;
//! let mut trie = db.open_ref(HEAD)?;
//! trie.update(b"key", b"value")?;
//! let root = db.commit(&mut trie, HEAD)?;
//! ```

pub mod config;
pub mod model;
pub mod store;
pub mod trie;

mod database;
mod error;

pub use config::Config;
pub use database::{Database, Status, HEAD};
pub use error::{Error, Result};
pub use model::Hash;
pub use store::{FileStore, KvStore, MemoryStore};
pub use trie::{NodeCache, Trie};

/// Data log format version
pub const VERSION: u32 = 1;

/// Magic bytes at the start of the data log
pub const MAGIC: &[u8; 8] = b"MPTDBLOG";
