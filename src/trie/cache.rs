//! Node cache between trie edits and the backing store
//!
//! Dirty nodes (built since the last flush) live only here until `flush`
//! writes the ones reachable from a root. Each dirty node remembers which
//! handles staged it, so one handle's flush never drops another's work.
//! Clean nodes (known durable) are kept in an LRU under a byte budget and
//! may be evicted at any time; dirty nodes never are.

use super::codec;
use super::node::Node;
use crate::model::Hash;
use crate::store::{BatchOp, KvStore};
use crate::{Error, Result};
use log::{debug, info, warn};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const JOURNAL_VERSION: u32 = 1;

/// Per-entry bookkeeping on top of the encoded size
const ENTRY_OVERHEAD: usize = Hash::LEN;

/// Identifies the handle that staged a dirty node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StagingId(u64);

struct DirtyNode {
    node: Arc<Node>,
    encoded: Vec<u8>,
    /// Handles still relying on this node being written
    owners: Vec<StagingId>,
}

impl DirtyNode {
    fn size(&self) -> usize {
        self.encoded.len() + ENTRY_OVERHEAD
    }
}

struct CleanNode {
    node: Arc<Node>,
    size: usize,
}

/// Counters describing the cache
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub dirty_nodes: usize,
    pub dirty_bytes: usize,
    pub clean_nodes: usize,
    pub clean_bytes: usize,
}

/// Outcome of a flush
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Nodes written to the store
    pub written: usize,
    /// Encoded bytes written
    pub bytes: usize,
    /// Reachable nodes that were already durable
    pub skipped: usize,
    /// Nodes of this handle dropped because the root no longer reaches them
    pub discarded: usize,
}

/// On-disk form of the clean cache
#[derive(Serialize, Deserialize)]
struct Journal {
    version: u32,
    /// Node encodings, most recently used first
    nodes: Vec<Vec<u8>>,
}

struct CacheState {
    dirty: HashMap<Hash, DirtyNode>,
    dirty_bytes: usize,
    clean: LruCache<Hash, CleanNode>,
    clean_bytes: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    /// Withdraw `owner`'s claim on every dirty node, dropping the ones
    /// nobody else staged. Returns how many were dropped.
    fn release(&mut self, owner: StagingId) -> usize {
        let mut dropped = 0;
        let mut freed = 0;
        self.dirty.retain(|_, dirty| {
            dirty.owners.retain(|o| *o != owner);
            if dirty.owners.is_empty() {
                dropped += 1;
                freed += dirty.size();
                false
            } else {
                true
            }
        });
        self.dirty_bytes -= freed;
        dropped
    }

    fn insert_clean(&mut self, limit: usize, hash: Hash, node: Arc<Node>, encoded_len: usize) {
        let size = encoded_len + ENTRY_OVERHEAD;
        if size > limit {
            return;
        }
        if let Some(old) = self.clean.put(hash, CleanNode { node, size }) {
            self.clean_bytes -= old.size;
        }
        self.clean_bytes += size;

        while self.clean_bytes > limit {
            match self.clean.pop_lru() {
                Some((_, evicted)) => self.clean_bytes -= evicted.size,
                None => break,
            }
        }
    }
}

/// Shared cache of trie nodes, keyed by content hash
pub struct NodeCache {
    store: Arc<dyn KvStore>,
    clean_limit: usize,
    state: Mutex<CacheState>,
    next_staging: AtomicU64,
}

impl NodeCache {
    /// Create a cache over `store` keeping at most `clean_limit` bytes of
    /// clean nodes
    pub fn new(store: Arc<dyn KvStore>, clean_limit: usize) -> Self {
        NodeCache {
            store,
            clean_limit,
            state: Mutex::new(CacheState {
                dirty: HashMap::new(),
                dirty_bytes: 0,
                clean: LruCache::unbounded(),
                clean_bytes: 0,
                hits: 0,
                misses: 0,
            }),
            next_staging: AtomicU64::new(0),
        }
    }

    /// A fresh identity for a handle that stages nodes
    pub fn register(&self) -> StagingId {
        StagingId(self.next_staging.fetch_add(1, Ordering::Relaxed))
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Look a node up in memory, then in the store. `Ok(None)` means the
    /// hash is unknown everywhere; the caller decides whether that is
    /// corruption.
    pub fn get(&self, hash: &Hash) -> Result<Option<Arc<Node>>> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let cached = match state.dirty.get(hash) {
                Some(dirty) => Some(dirty.node.clone()),
                None => state.clean.get(hash).map(|clean| clean.node.clone()),
            };
            if let Some(node) = cached {
                state.hits += 1;
                return Ok(Some(node));
            }
            state.misses += 1;
        }

        // Read through without holding the lock
        let bytes = match self.store.get(hash.as_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if Hash::digest(&bytes) != *hash {
            return Err(Error::Corruption(format!(
                "stored node {} does not match its hash",
                hash
            )));
        }
        let node = Arc::new(codec::decode(&bytes)?);

        self.state
            .lock()
            .insert_clean(self.clean_limit, *hash, node.clone(), bytes.len());
        Ok(Some(node))
    }

    /// Stage a node as dirty on behalf of `owner` and return its hash.
    /// Nothing touches the store.
    pub fn put(&self, owner: StagingId, node: Node) -> Hash {
        let encoded = codec::encode(&node);
        self.stage(owner, node, encoded)
    }

    /// Stage a node whose encoding the caller already has
    pub(crate) fn stage(&self, owner: StagingId, node: Node, encoded: Vec<u8>) -> Hash {
        let hash = Hash::digest(&encoded);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.dirty.get_mut(&hash) {
            Some(dirty) => {
                if !dirty.owners.contains(&owner) {
                    dirty.owners.push(owner);
                }
            }
            None => {
                let dirty = DirtyNode {
                    node: Arc::new(node),
                    encoded,
                    owners: vec![owner],
                };
                state.dirty_bytes += dirty.size();
                state.dirty.insert(hash, dirty);
            }
        }
        hash
    }

    /// Whether a node is staged and not yet flushed
    pub fn is_dirty(&self, hash: &Hash) -> bool {
        self.state.lock().dirty.contains_key(hash)
    }

    /// Write every dirty node reachable from `root` to the store in one
    /// atomic batch. Afterwards those nodes are clean and the rest of
    /// `owner`'s staged nodes are dropped; nodes staged by other handles
    /// stay dirty.
    ///
    /// Every hash the root reaches must be staged or already stored. If it
    /// is not, or the batch fails, nothing is written and the dirty set is
    /// left untouched so the flush can be retried.
    pub fn flush(&self, owner: StagingId, root: Hash) -> Result<FlushStats> {
        let mut state = self.state.lock();
        let mut stats = FlushStats::default();

        if !root.is_zero()
            && !state.dirty.contains_key(&root)
            && !self.store.contains(root.as_bytes())?
        {
            return Err(Error::Corruption(format!("flush root {} is unknown", root)));
        }

        let mut ops = Vec::new();
        let mut reachable = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = if root.is_zero() { Vec::new() } else { vec![root] };

        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            let Some(dirty) = state.dirty.get(&hash) else {
                // Stored nodes are durable along with everything below them
                if self.store.contains(hash.as_bytes())? {
                    continue;
                }
                return Err(Error::Corruption(format!(
                    "node {} below root {} is neither staged nor stored",
                    hash,
                    root.short()
                )));
            };
            dirty.node.hash_refs(&mut stack);

            if self.store.contains(hash.as_bytes())? {
                stats.skipped += 1;
            } else {
                stats.written += 1;
                stats.bytes += dirty.encoded.len();
                ops.push(BatchOp::put(hash.as_bytes().to_vec(), dirty.encoded.clone()));
            }
            reachable.push(hash);
        }

        self.store.write_batch(ops)?;

        for hash in reachable {
            if let Some(dirty) = state.dirty.remove(&hash) {
                state.dirty_bytes -= dirty.size();
                state.insert_clean(self.clean_limit, hash, dirty.node, dirty.encoded.len());
            }
        }
        stats.discarded = state.release(owner);

        debug!(
            "flushed root {}: {} written ({} bytes), {} skipped, {} discarded",
            root.short(),
            stats.written,
            stats.bytes,
            stats.skipped,
            stats.discarded
        );
        Ok(stats)
    }

    /// Drop every node staged only by `owner`
    pub fn discard_dirty(&self, owner: StagingId) -> usize {
        self.state.lock().release(owner)
    }

    /// Forget a clean node, e.g. after it was pruned from the store
    pub fn evict(&self, hash: &Hash) {
        let mut state = self.state.lock();
        if let Some(old) = state.clean.pop(hash) {
            state.clean_bytes -= old.size;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            dirty_nodes: state.dirty.len(),
            dirty_bytes: state.dirty_bytes,
            clean_nodes: state.clean.len(),
            clean_bytes: state.clean_bytes,
        }
    }

    /// Persist the clean entries so a later process starts warm. Returns the
    /// number of nodes written.
    pub fn save_journal(&self, path: &Path) -> Result<usize> {
        let nodes: Vec<Vec<u8>> = {
            let state = self.state.lock();
            state
                .clean
                .iter()
                .map(|(_, clean)| codec::encode(&clean.node))
                .collect()
        };
        let count = nodes.len();
        let data = bincode::serialize(&Journal {
            version: JOURNAL_VERSION,
            nodes,
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;

        info!("saved {} cached nodes to {}", count, path.display());
        Ok(count)
    }

    /// Warm the clean cache from a journal. Entries no longer present in the
    /// store are skipped. An unreadable journal only costs the warm start.
    pub fn load_journal(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let data = fs::read(path)?;
        let journal: Journal = match bincode::deserialize(&data) {
            Ok(journal) => journal,
            Err(e) => {
                warn!("ignoring unreadable cache journal {}: {}", path.display(), e);
                return Ok(0);
            }
        };
        if journal.version != JOURNAL_VERSION {
            warn!(
                "ignoring cache journal {} with version {}",
                path.display(),
                journal.version
            );
            return Ok(0);
        }

        let mut loaded = 0;
        // Oldest first so the most recent entries end up most recent again
        for encoded in journal.nodes.iter().rev() {
            let hash = Hash::digest(encoded);
            if !self.store.contains(hash.as_bytes())? {
                continue;
            }
            let node = match codec::decode(encoded) {
                Ok(node) => node,
                Err(e) => {
                    warn!("skipping journal entry {}: {}", hash.short(), e);
                    continue;
                }
            };
            self.state
                .lock()
                .insert_clean(self.clean_limit, hash, Arc::new(node), encoded.len());
            loaded += 1;
        }

        info!("loaded {} cached nodes from {}", loaded, path.display());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::trie::node::{empty_children, NodeRef};
    use tempfile::tempdir;

    fn leaf(n: u8) -> Node {
        Node::leaf(vec![n & 0x0f; 8], vec![n; 40])
    }

    fn setup(limit: usize) -> (Arc<MemoryStore>, NodeCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = NodeCache::new(store.clone(), limit);
        (store, cache)
    }

    /// A branch pointing at two staged leaves
    fn staged_tree(cache: &NodeCache, owner: StagingId) -> (Hash, Hash, Hash) {
        let a = cache.put(owner, leaf(1));
        let b = cache.put(owner, leaf(2));
        let mut children = empty_children();
        children[1] = Some(NodeRef::Hash(a));
        children[2] = Some(NodeRef::Hash(b));
        let root = cache.put(
            owner,
            Node::Branch {
                children,
                value: None,
            },
        );
        (root, a, b)
    }

    #[test]
    fn test_put_does_not_touch_store() {
        let (store, cache) = setup(1 << 20);
        let hash = cache.put(cache.register(), leaf(1));

        assert!(cache.is_dirty(&hash));
        assert!(store.is_empty());
        assert_eq!(*cache.get(&hash).unwrap().unwrap(), leaf(1));
    }

    #[test]
    fn test_unknown_hash_is_none() {
        let (_store, cache) = setup(1 << 20);
        assert!(cache.get(&Hash::digest(b"nothing")).unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_flush_writes_reachable_nodes_once() {
        let (store, cache) = setup(1 << 20);
        let owner = cache.register();
        let (root, a, b) = staged_tree(&cache, owner);
        let garbage = cache.put(owner, leaf(3));

        let stats = cache.flush(owner, root).unwrap();
        assert_eq!(stats.written, 3);
        assert_eq!(stats.discarded, 1);
        assert_eq!(cache.stats().dirty_nodes, 0);
        assert_eq!(cache.stats().dirty_bytes, 0);

        for hash in [root, a, b] {
            assert!(store.contains(hash.as_bytes()).unwrap());
        }
        assert!(!store.contains(garbage.as_bytes()).unwrap());

        // Re-staging durable nodes writes nothing new
        staged_tree(&cache, owner);
        let again = cache.flush(owner, root).unwrap();
        assert_eq!(again.written, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(store.put_count(), 3);
    }

    #[test]
    fn test_flush_of_unknown_root_fails() {
        let (_store, cache) = setup(1 << 20);
        let owner = cache.register();
        let err = cache.flush(owner, Hash::digest(b"ghost")).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_flush_keeps_other_handles_nodes() {
        let (store, cache) = setup(1 << 20);
        let first = cache.register();
        let second = cache.register();

        let (pending, a, _) = staged_tree(&cache, first);
        let shared = cache.put(second, leaf(1));
        assert_eq!(shared, a);
        let own = cache.put(second, leaf(4));

        // `second` commits a single leaf; its other node and all of
        // `first`'s work stay staged
        let stats = cache.flush(second, own).unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.discarded, 0);
        assert!(cache.is_dirty(&pending));
        assert!(cache.is_dirty(&a));
        assert_eq!(cache.stats().dirty_nodes, 3);

        let stats = cache.flush(first, pending).unwrap();
        assert_eq!(stats.written, 3);
        assert_eq!(cache.stats().dirty_nodes, 0);
        assert!(store.contains(pending.as_bytes()).unwrap());
    }

    #[test]
    fn test_flush_with_unresolvable_child_writes_nothing() {
        let (store, cache) = setup(1 << 20);
        let owner = cache.register();
        let mut children = empty_children();
        children[3] = Some(NodeRef::Hash(Hash::digest(b"vanished")));
        children[7] = Some(NodeRef::Hash(cache.put(owner, leaf(7))));
        let root = cache.put(
            owner,
            Node::Branch {
                children,
                value: None,
            },
        );

        let err = cache.flush(owner, root).unwrap_err();
        assert!(err.is_corruption());
        assert!(store.is_empty());
        assert_eq!(cache.stats().dirty_nodes, 2);
        assert!(cache.is_dirty(&root));
    }

    #[test]
    fn test_discard_only_drops_own_nodes() {
        let (_store, cache) = setup(1 << 20);
        let first = cache.register();
        let second = cache.register();

        let (root, a, b) = staged_tree(&cache, first);
        cache.put(second, leaf(1));
        let only_second = cache.put(second, leaf(9));

        assert_eq!(cache.discard_dirty(first), 2);
        assert!(!cache.is_dirty(&root));
        assert!(!cache.is_dirty(&b));
        assert!(cache.is_dirty(&a));

        assert_eq!(cache.discard_dirty(second), 2);
        assert!(!cache.is_dirty(&only_second));
        let stats = cache.stats();
        assert_eq!(stats.dirty_nodes, 0);
        assert_eq!(stats.dirty_bytes, 0);
    }

    #[test]
    fn test_read_through_verifies_hash() {
        let (store, cache) = setup(1 << 20);
        let hash = Hash::digest(b"claimed");
        store
            .put(hash.as_bytes(), &codec::encode(&leaf(1)))
            .unwrap();

        assert!(cache.get(&hash).unwrap_err().is_corruption());
    }

    #[test]
    fn test_read_through_rejects_malformed_node() {
        let (store, cache) = setup(1 << 20);
        let bytes = vec![0x7f, 1, 2];
        let hash = Hash::digest(&bytes);
        store.put(hash.as_bytes(), &bytes).unwrap();

        let err = cache.get(&hash).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_clean_entries_are_evicted_by_recency() {
        let entry = codec::encode(&leaf(0)).len() + ENTRY_OVERHEAD;
        let (store, cache) = setup(entry * 2);

        let hashes: Vec<Hash> = (0..3)
            .map(|n| {
                let bytes = codec::encode(&leaf(n));
                let hash = Hash::digest(&bytes);
                store.put(hash.as_bytes(), &bytes).unwrap();
                hash
            })
            .collect();

        cache.get(&hashes[0]).unwrap();
        cache.get(&hashes[1]).unwrap();
        cache.get(&hashes[0]).unwrap();
        cache.get(&hashes[2]).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.clean_nodes, 2);
        assert!(stats.clean_bytes <= entry * 2);

        // hashes[1] was least recently used and had to go
        let misses = cache.stats().misses;
        cache.get(&hashes[0]).unwrap();
        assert_eq!(cache.stats().misses, misses);
        cache.get(&hashes[1]).unwrap();
        assert_eq!(cache.stats().misses, misses + 1);
    }

    #[test]
    fn test_dirty_entries_survive_zero_budget() {
        let (_store, cache) = setup(0);
        let owner = cache.register();
        let (root, a, _) = staged_tree(&cache, owner);

        assert!(cache.get(&a).unwrap().is_some());
        cache.flush(owner, root).unwrap();
        assert_eq!(cache.stats().clean_nodes, 0);
        // Still resolvable through the store
        assert!(cache.get(&a).unwrap().is_some());
    }

    #[test]
    fn test_journal_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        let (store, cache) = setup(1 << 20);
        let owner = cache.register();
        let (root, _, _) = staged_tree(&cache, owner);
        cache.flush(owner, root).unwrap();

        assert_eq!(cache.save_journal(&path).unwrap(), 3);

        let warm = NodeCache::new(store.clone(), 1 << 20);
        assert_eq!(warm.load_journal(&path).unwrap(), 3);
        warm.get(&root).unwrap().unwrap();
        assert_eq!(warm.stats().misses, 0);

        // Nodes pruned from the store are not resurrected
        store.delete(root.as_bytes()).unwrap();
        let pruned = NodeCache::new(store, 1 << 20);
        assert_eq!(pruned.load_journal(&path).unwrap(), 2);
    }

    #[test]
    fn test_garbled_journal_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, b"not a journal").unwrap();

        let (_store, cache) = setup(1 << 20);
        assert_eq!(cache.load_journal(&path).unwrap(), 0);
        assert_eq!(cache.load_journal(&dir.path().join("missing")).unwrap(), 0);
    }
}
