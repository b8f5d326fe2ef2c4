//! Error types for mptdb

use crate::trie::DecodeError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mptdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mptdb operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A root hash that was asked for is not present in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// A node referenced by the structure could not be resolved or verified
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Malformed node: {0}")]
    Malformed(#[from] DecodeError),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Store is locked: {}", .0.display())]
    Locked(PathBuf),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the stored structure cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::Malformed(_))
    }

    /// Whether this error reports an unresolvable root
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
