//! Merkle-Patricia trie over the node cache

use super::cache::{NodeCache, StagingId};
use super::codec;
use super::nibbles::{bytes_to_nibbles, common_prefix_len, nibbles_to_bytes};
use super::node::{empty_children, Children, Node, NodeRef};
use crate::model::Hash;
use crate::{Error, Result};
use log::debug;
use std::sync::Arc;

/// A handle on one version of the key space
///
/// Edits are copy-on-write: every touched node is rebuilt up to the root and
/// staged in the cache, untouched subtrees are shared with older versions.
/// The shape of the trie depends only on its key/value set, so equal sets
/// always have equal root hashes.
///
/// A handle is not meant to be mutated from several threads at once, but
/// `get` may run concurrently on any number of threads. Handles sharing a
/// cache commit independently; nodes a handle staged but never committed
/// are dropped with it.
pub struct Trie {
    cache: Arc<NodeCache>,
    /// Identity of this handle's staged nodes in the cache
    staging: StagingId,
    /// Root node (cached in memory)
    root: Node,
    inline_threshold: usize,
}

impl Trie {
    /// Create a new empty trie
    pub fn new(cache: Arc<NodeCache>, inline_threshold: usize) -> Self {
        let staging = cache.register();
        Trie {
            cache,
            staging,
            root: Node::Empty,
            inline_threshold,
        }
    }

    /// Load the snapshot named by `root_hash`. The zero hash is the empty
    /// trie; any other hash must be resolvable.
    pub fn open(cache: Arc<NodeCache>, root_hash: Hash, inline_threshold: usize) -> Result<Self> {
        let mut trie = Trie::new(cache, inline_threshold);

        if !root_hash.is_zero() {
            let root = trie
                .cache
                .get(&root_hash)?
                .ok_or_else(|| Error::NotFound(format!("trie root {}", root_hash)))?;
            trie.root = (*root).clone();
        }

        Ok(trie)
    }

    /// Hash of the current root, committed or not
    pub fn hash(&self) -> Hash {
        if self.root.is_empty() {
            Hash::ZERO
        } else {
            codec::hash(&self.root)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.lookup(&self.root, &bytes_to_nibbles(key))
    }

    /// Insert or overwrite a key
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let root = self.insert(self.root.clone(), &bytes_to_nibbles(key), value.to_vec())?;
        self.root = root;
        Ok(())
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let (root, removed) = self.remove(self.root.clone(), &bytes_to_nibbles(key))?;
        if removed {
            self.root = root;
        }
        Ok(removed)
    }

    /// Persist all nodes of the current version and return its root hash.
    /// The handle stays usable for building the next version.
    pub fn commit(&mut self) -> Result<Hash> {
        if self.root.is_empty() {
            self.cache.discard_dirty(self.staging);
            return Ok(Hash::ZERO);
        }

        // The root is always stored by hash, however small
        let encoded = codec::encode(&self.root);
        let root_hash = self.cache.stage(self.staging, self.root.clone(), encoded);
        let stats = self.cache.flush(self.staging, root_hash)?;

        debug!(
            "committed root {} ({} nodes written)",
            root_hash.short(),
            stats.written
        );
        Ok(root_hash)
    }

    /// All key/value pairs in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.entries_with_prefix(&[])
    }

    /// All key/value pairs whose key starts with `prefix`, in key order
    pub fn entries_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut path = Vec::new();
        self.collect(&self.root, &bytes_to_nibbles(prefix), &mut path, &mut results)?;
        Ok(results)
    }

    // === Internal helpers ===

    fn resolve(&self, hash: &Hash) -> Result<Arc<Node>> {
        self.cache
            .get(hash)?
            .ok_or_else(|| Error::Corruption(format!("missing trie node {}", hash)))
    }

    fn load(&self, child: NodeRef) -> Result<Node> {
        match child {
            NodeRef::Inline(node) => Ok(*node),
            NodeRef::Hash(hash) => Ok((*self.resolve(&hash)?).clone()),
        }
    }

    /// Embed small nodes, stage the rest and point at them by hash
    fn make_ref(&self, node: Node) -> NodeRef {
        let encoded = codec::encode(&node);
        if encoded.len() < self.inline_threshold {
            NodeRef::Inline(Box::new(node))
        } else {
            NodeRef::Hash(self.cache.stage(self.staging, node, encoded))
        }
    }

    fn lookup(&self, node: &Node, path: &[u8]) -> Result<Option<Vec<u8>>> {
        match node {
            Node::Empty => Ok(None),
            Node::Leaf {
                path: leaf_path,
                value,
            } => Ok((leaf_path.as_slice() == path).then(|| value.clone())),
            Node::Extension {
                path: shared,
                child,
            } => {
                if !path.starts_with(shared) {
                    return Ok(None);
                }
                self.lookup_ref(child, &path[shared.len()..])
            }
            Node::Branch { children, value } => match path.split_first() {
                None => Ok(value.clone()),
                Some((&nibble, rest)) => match &children[nibble as usize] {
                    Some(child) => self.lookup_ref(child, rest),
                    None => Ok(None),
                },
            },
        }
    }

    fn lookup_ref(&self, child: &NodeRef, path: &[u8]) -> Result<Option<Vec<u8>>> {
        match child {
            NodeRef::Inline(node) => self.lookup(node, path),
            NodeRef::Hash(hash) => {
                let node = self.resolve(hash)?;
                self.lookup(&node, path)
            }
        }
    }

    fn insert(&self, node: Node, path: &[u8], value: Vec<u8>) -> Result<Node> {
        match node {
            Node::Empty => Ok(Node::leaf(path.to_vec(), value)),

            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let common = common_prefix_len(&leaf_path, path);
                if common == leaf_path.len() && common == path.len() {
                    return Ok(Node::leaf(leaf_path, value));
                }

                // The keys diverge (or one ends) after `common` nibbles
                let mut children = empty_children();
                let mut branch_value = None;
                self.place(&mut children, &mut branch_value, &leaf_path[common..], leaf_value);
                self.place(&mut children, &mut branch_value, &path[common..], value);

                let branch = Node::Branch {
                    children,
                    value: branch_value,
                };
                Ok(self.join(path[..common].to_vec(), branch))
            }

            Node::Extension {
                path: shared,
                child,
            } => {
                let common = common_prefix_len(&shared, path);
                if common == shared.len() {
                    let child_node = self.load(child)?;
                    let updated = self.insert(child_node, &path[common..], value)?;
                    return Ok(Node::Extension {
                        path: shared,
                        child: self.make_ref(updated),
                    });
                }

                // Split the extension at the first differing nibble
                let mut children = empty_children();
                let mut branch_value = None;
                let rest = &shared[common + 1..];
                children[shared[common] as usize] = Some(if rest.is_empty() {
                    child
                } else {
                    self.make_ref(Node::Extension {
                        path: rest.to_vec(),
                        child,
                    })
                });
                self.place(&mut children, &mut branch_value, &path[common..], value);

                let branch = Node::Branch {
                    children,
                    value: branch_value,
                };
                Ok(self.join(shared[..common].to_vec(), branch))
            }

            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                let Some((&nibble, rest)) = path.split_first() else {
                    return Ok(Node::Branch {
                        children,
                        value: Some(value),
                    });
                };

                let slot = &mut children[nibble as usize];
                let child_node = match slot.take() {
                    Some(child) => self.load(child)?,
                    None => Node::Empty,
                };
                let updated = self.insert(child_node, rest, value)?;
                children[nibble as usize] = Some(self.make_ref(updated));

                Ok(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    /// Put a key remainder into a fresh branch
    fn place(
        &self,
        children: &mut Children,
        branch_value: &mut Option<Vec<u8>>,
        path: &[u8],
        value: Vec<u8>,
    ) {
        match path.split_first() {
            None => *branch_value = Some(value),
            Some((&nibble, rest)) => {
                children[nibble as usize] = Some(self.make_ref(Node::leaf(rest.to_vec(), value)));
            }
        }
    }

    /// Prepend `prefix` to a node, merging paths where the node has one
    fn join(&self, mut prefix: Vec<u8>, node: Node) -> Node {
        if prefix.is_empty() {
            return node;
        }
        match node {
            Node::Empty => Node::Empty,
            Node::Leaf { path, value } => {
                prefix.extend_from_slice(&path);
                Node::Leaf {
                    path: prefix,
                    value,
                }
            }
            Node::Extension { path, child } => {
                prefix.extend_from_slice(&path);
                Node::Extension {
                    path: prefix,
                    child,
                }
            }
            branch @ Node::Branch { .. } => Node::Extension {
                path: prefix,
                child: self.make_ref(branch),
            },
        }
    }

    fn remove(&self, node: Node, path: &[u8]) -> Result<(Node, bool)> {
        match node {
            Node::Empty => Ok((Node::Empty, false)),

            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path == path {
                    Ok((Node::Empty, true))
                } else {
                    Ok((
                        Node::Leaf {
                            path: leaf_path,
                            value,
                        },
                        false,
                    ))
                }
            }

            Node::Extension {
                path: shared,
                child,
            } => {
                if !path.starts_with(&shared) {
                    return Ok((Node::Extension { path: shared, child }, false));
                }
                let child_node = self.load(child.clone())?;
                let (updated, removed) = self.remove(child_node, &path[shared.len()..])?;
                if !removed {
                    return Ok((Node::Extension { path: shared, child }, false));
                }
                Ok((self.join(shared, updated), true))
            }

            Node::Branch {
                mut children,
                value,
            } => {
                let Some((&nibble, rest)) = path.split_first() else {
                    if value.is_none() {
                        return Ok((Node::Branch { children, value }, false));
                    }
                    return Ok((self.collapse(children, None)?, true));
                };

                let Some(child) = children[nibble as usize].clone() else {
                    return Ok((Node::Branch { children, value }, false));
                };
                let (updated, removed) = self.remove(self.load(child)?, rest)?;
                if !removed {
                    return Ok((Node::Branch { children, value }, false));
                }

                children[nibble as usize] = if updated.is_empty() {
                    None
                } else {
                    Some(self.make_ref(updated))
                };
                Ok((self.collapse(children, value)?, true))
            }
        }
    }

    /// Restore minimal form after a branch lost an entry
    fn collapse(&self, mut children: Children, value: Option<Vec<u8>>) -> Result<Node> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_some())
            .map(|(i, _)| i)
            .collect();

        match (occupied.as_slice(), value) {
            ([], None) => Ok(Node::Empty),
            ([], Some(value)) => Ok(Node::leaf(Vec::new(), value)),
            ([only], None) => {
                let nibble = *only;
                match children[nibble].take() {
                    Some(child) => {
                        let node = self.load(child)?;
                        Ok(self.join(vec![nibble as u8], node))
                    }
                    None => Ok(Node::Empty),
                }
            }
            (_, value) => Ok(Node::Branch { children, value }),
        }
    }

    fn collect(
        &self,
        node: &Node,
        prefix: &[u8],
        path: &mut Vec<u8>,
        results: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        // Only descend where the prefix can still match
        let relevant = |path: &[u8]| path.starts_with(prefix) || prefix.starts_with(path);

        match node {
            Node::Empty => {}
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                let len = path.len();
                path.extend_from_slice(leaf_path);
                if path.starts_with(prefix) {
                    results.push((nibbles_to_bytes(path), value.clone()));
                }
                path.truncate(len);
            }
            Node::Extension {
                path: shared,
                child,
            } => {
                let len = path.len();
                path.extend_from_slice(shared);
                if relevant(path.as_slice()) {
                    self.collect_ref(child, prefix, path, results)?;
                }
                path.truncate(len);
            }
            Node::Branch { children, value } => {
                if let Some(value) = value {
                    if path.starts_with(prefix) {
                        results.push((nibbles_to_bytes(path), value.clone()));
                    }
                }
                for (nibble, child) in children.iter().enumerate() {
                    let Some(child) = child else {
                        continue;
                    };
                    path.push(nibble as u8);
                    if relevant(path.as_slice()) {
                        self.collect_ref(child, prefix, path, results)?;
                    }
                    path.pop();
                }
            }
        }
        Ok(())
    }

    fn collect_ref(
        &self,
        child: &NodeRef,
        prefix: &[u8],
        path: &mut Vec<u8>,
        results: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        match child {
            NodeRef::Inline(node) => self.collect(node, prefix, path, results),
            NodeRef::Hash(hash) => {
                let node = self.resolve(hash)?;
                self.collect(&node, prefix, path, results)
            }
        }
    }
}

impl Drop for Trie {
    fn drop(&mut self) {
        self.cache.discard_dirty(self.staging);
    }
}
