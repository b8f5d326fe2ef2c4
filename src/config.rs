//! Configuration passed explicitly to the store, cache and trie
//!
//! Stored as JSON. Every field has a default so a partial file is valid.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default byte budget for clean cached nodes
pub const DEFAULT_CLEAN_LIMIT: usize = 16 * 1024 * 1024;

/// Default inline threshold: children whose encoding is shorter are embedded
pub const DEFAULT_INLINE_THRESHOLD: usize = 32;

/// Default file name of the clean cache journal
pub const DEFAULT_JOURNAL: &str = "triejournal";

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub trie: TrieConfig,
    pub store: StoreConfig,
}

/// Node cache settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory allowance in bytes for clean (already durable) nodes
    pub clean_limit: usize,
    /// Where to persist clean cache entries between runs. Relative paths are
    /// resolved against the store directory.
    pub journal: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            clean_limit: DEFAULT_CLEAN_LIMIT,
            journal: Some(PathBuf::from(DEFAULT_JOURNAL)),
        }
    }
}

/// Trie structure settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Encoded size (in bytes) below which a child node is embedded in its
    /// parent instead of being referenced by hash. Changing it changes root
    /// hashes for new versions.
    pub inline_threshold: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }
}

/// Backing store settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// zstd level for stored values, `None` stores them raw
    pub compression_level: Option<i32>,
    /// fsync the log after every write batch
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            compression_level: Some(3),
            sync_writes: true,
        }
    }
}

impl Config {
    /// Default config location (~/.config/mptdb/config.json)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mptdb").join("config.json"))
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config at `path` if given, else the default location if it
    /// exists, else the built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Config::default()),
        }
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings the trie cannot work with
    pub fn validate(&self) -> Result<()> {
        // An inline child must stay smaller than a hash reference
        if self.trie.inline_threshold > crate::model::Hash::LEN {
            return Err(Error::Config(format!(
                "inline_threshold {} exceeds hash length {}",
                self.trie.inline_threshold,
                crate::model::Hash::LEN
            )));
        }
        if let Some(level) = self.store.compression_level {
            if !(1..=22).contains(&level) {
                return Err(Error::Config(format!(
                    "compression_level {} out of range 1..=22",
                    level
                )));
            }
        }
        Ok(())
    }

    /// Resolve the journal path against the store directory
    pub fn journal_path(&self, store_dir: &Path) -> Option<PathBuf> {
        self.cache.journal.as_ref().map(|journal| {
            if journal.is_absolute() {
                journal.clone()
            } else {
                store_dir.join(journal)
            }
        })
    }
}
