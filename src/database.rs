//! High-level Database API
//!
//! This module ties a backing store, a shared node cache and named refs
//! together. It is the main entry point for interacting with mptdb.

use crate::config::Config;
use crate::model::Hash;
use crate::store::{BatchOp, FileStore, KvStore, MemoryStore};
use crate::trie::{CacheStats, NodeCache, Trie};
use crate::{Error, Result};
use log::info;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key prefix for named refs; node keys are bare 32-byte hashes
const REF_PREFIX: &[u8] = b"ref/";

/// The ref advanced by default commits
pub const HEAD: &str = "HEAD";

/// Summary of an open database
#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub path: Option<PathBuf>,
    pub keys: usize,
    pub head: Option<String>,
    pub refs: usize,
    pub cache: CacheStats,
}

/// The main database interface
///
/// Provides a convenient API for:
/// - Opening trie versions by root hash
/// - Committing tries and recording their roots under named refs
/// - Garbage-collecting versions nobody refers to
pub struct Database {
    store: Arc<dyn KvStore>,
    cache: Arc<NodeCache>,
    config: Config,
    /// Store directory, `None` for in-memory databases
    dir: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database in `dir`
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let store: Arc<dyn KvStore> = Arc::new(FileStore::open(&dir, &config.store)?);

        let db = Database {
            cache: Arc::new(NodeCache::new(store.clone(), config.cache.clean_limit)),
            store,
            config,
            dir: Some(dir),
        };

        if let Some(journal) = db.journal_path() {
            db.cache.load_journal(&journal)?;
        }
        Ok(db)
    }

    /// A database that lives only as long as the handle
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Use an already opened store
    pub fn with_store(store: Arc<dyn KvStore>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Database {
            cache: Arc::new(NodeCache::new(store.clone(), config.cache.clean_limit)),
            store,
            config,
            dir: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    // === Tries ===

    /// A fresh empty trie
    pub fn new_trie(&self) -> Trie {
        Trie::new(self.cache.clone(), self.config.trie.inline_threshold)
    }

    /// Open the version identified by `root`
    pub fn open_trie(&self, root: Hash) -> Result<Trie> {
        Trie::open(self.cache.clone(), root, self.config.trie.inline_threshold)
    }

    /// Open the version `name` points at, or an empty trie if the ref is unset
    pub fn open_ref(&self, name: &str) -> Result<Trie> {
        self.open_trie(self.get_ref(name)?.unwrap_or(Hash::ZERO))
    }

    /// Persist `trie` and point `ref_name` at its root. The ref is only
    /// written once every node of the version is durable.
    pub fn commit(&self, trie: &mut Trie, ref_name: &str) -> Result<Hash> {
        let root = trie.commit()?;
        self.set_ref(ref_name, root)?;
        info!("{} -> {}", ref_name, root.short());
        Ok(root)
    }

    // === Refs ===

    /// Get the root a ref points at
    pub fn get_ref(&self, name: &str) -> Result<Option<Hash>> {
        match self.store.get(&ref_key(name))? {
            Some(bytes) => parse_ref(name, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Point a ref at a root
    pub fn set_ref(&self, name: &str, root: Hash) -> Result<()> {
        self.store.put(&ref_key(name), root.as_bytes())
    }

    /// Remove a ref. Its versions become prunable unless referenced elsewhere.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        self.store.delete(&ref_key(name))
    }

    /// All refs in name order
    pub fn refs(&self) -> Result<Vec<(String, Hash)>> {
        self.store
            .scan_prefix(REF_PREFIX)?
            .into_iter()
            .map(|(key, value)| {
                let name = String::from_utf8_lossy(&key[REF_PREFIX.len()..]).into_owned();
                let root = parse_ref(&name, &value)?;
                Ok((name, root))
            })
            .collect()
    }

    /// Root of `HEAD`
    pub fn head(&self) -> Result<Option<Hash>> {
        self.get_ref(HEAD)
    }

    // === Maintenance ===

    /// Delete every stored node not reachable from `keep`. Returns the
    /// number of nodes removed.
    ///
    /// Tries opened on other roots must not be used afterwards.
    pub fn prune(&self, keep: &[Hash]) -> Result<usize> {
        let live = self.reachable(keep)?;

        let mut ops = Vec::new();
        let mut removed = Vec::new();
        for key in self.store.keys_with_prefix(&[])? {
            if key.starts_with(REF_PREFIX) {
                continue;
            }
            let Some(hash) = Hash::from_slice(&key) else {
                continue;
            };
            if !live.contains(&hash) {
                removed.push(hash);
                ops.push(BatchOp::delete(key));
            }
        }

        self.store.write_batch(ops)?;
        for hash in &removed {
            self.cache.evict(hash);
        }

        info!(
            "pruned {} nodes, {} live from {} roots",
            removed.len(),
            live.len(),
            keep.len()
        );
        Ok(removed.len())
    }

    /// Prune everything no ref points at
    pub fn prune_unreferenced(&self) -> Result<usize> {
        let roots: Vec<Hash> = self.refs()?.into_iter().map(|(_, root)| root).collect();
        self.prune(&roots)
    }

    /// Hashes of every stored node below `roots`
    fn reachable(&self, roots: &[Hash]) -> Result<HashSet<Hash>> {
        let mut live = HashSet::new();
        let mut stack = Vec::new();

        for root in roots.iter().filter(|root| !root.is_zero()) {
            if self.cache.get(root)?.is_none() {
                return Err(Error::NotFound(format!("trie root {}", root)));
            }
            stack.push(*root);
        }

        while let Some(hash) = stack.pop() {
            if !live.insert(hash) {
                continue;
            }
            let node = self
                .cache
                .get(&hash)?
                .ok_or_else(|| Error::Corruption(format!("missing trie node {}", hash)))?;
            node.hash_refs(&mut stack);
        }
        Ok(live)
    }

    /// Reclaim space in the backing store
    pub fn compact(&self) -> Result<()> {
        self.store.compact()
    }

    /// Sync all data to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn status(&self) -> Result<Status> {
        Ok(Status {
            path: self.dir.clone(),
            keys: self.store.len(),
            head: self.head()?.map(|root| root.to_hex()),
            refs: self.refs()?.len(),
            cache: self.cache.stats(),
        })
    }

    /// Save the cache journal and sync. The store lock is released once the
    /// last trie opened from this database is dropped.
    pub fn close(self) -> Result<()> {
        if let Some(journal) = self.journal_path() {
            self.cache.save_journal(&journal)?;
        }
        self.store.sync()
    }

    fn journal_path(&self) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .and_then(|dir| self.config.journal_path(dir))
    }
}

fn ref_key(name: &str) -> Vec<u8> {
    let mut key = REF_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn parse_ref(name: &str, bytes: &[u8]) -> Result<Hash> {
    Hash::from_slice(bytes).ok_or_else(|| Error::Corruption(format!("ref {} is not a hash", name)))
}
