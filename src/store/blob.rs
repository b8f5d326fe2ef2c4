//! Blob type - a stored value with its on-disk encoding

use crate::{Error, Result};

/// How a value is laid out in the log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobEncoding {
    /// Bytes as given
    Raw,
    /// zstd frame
    Zstd,
}

impl BlobEncoding {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobEncoding::Raw => 0,
            BlobEncoding::Zstd => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobEncoding::Raw),
            1 => Some(BlobEncoding::Zstd),
            _ => None,
        }
    }
}

/// A value on its way into or out of the store
#[derive(Clone, Debug)]
pub struct Blob {
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Blob { data }
    }

    /// Encode for storage. Compression is skipped when it does not shrink
    /// the value.
    pub fn encode(&self, level: Option<i32>) -> Result<Vec<u8>> {
        if let Some(level) = level {
            let compressed = zstd::encode_all(self.data.as_slice(), level)?;
            if compressed.len() < self.data.len() {
                let mut output = Vec::with_capacity(compressed.len() + 1);
                output.push(BlobEncoding::Zstd.as_byte());
                output.extend(compressed);
                return Ok(output);
            }
        }

        let mut output = Vec::with_capacity(self.data.len() + 1);
        output.push(BlobEncoding::Raw.as_byte());
        output.extend_from_slice(&self.data);
        Ok(output)
    }

    /// Decode a value read from storage
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&tag, body) = data
            .split_first()
            .ok_or_else(|| Error::Corruption("Empty blob data".into()))?;

        let encoding = BlobEncoding::from_byte(tag)
            .ok_or_else(|| Error::Corruption(format!("Invalid blob encoding: {}", tag)))?;

        let data = match encoding {
            BlobEncoding::Raw => body.to_vec(),
            BlobEncoding::Zstd => zstd::decode_all(body)
                .map_err(|e| Error::Corruption(format!("Bad compressed blob: {}", e)))?,
        };

        Ok(Blob { data })
    }
}
