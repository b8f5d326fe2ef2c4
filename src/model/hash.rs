//! Node identifiers

use std::fmt;

/// BLAKE3 digest of a node encoding. A root's digest names a whole version.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; Hash::LEN]);

impl Hash {
    pub const LEN: usize = 32;

    /// Names the empty trie; never the digest of a stored node
    pub const ZERO: Hash = Hash([0; Hash::LEN]);

    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// `None` unless `bytes` is exactly `LEN` long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Hash)
    }

    /// Parse 64 hex digits, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0; Hash::LEN];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Hash::LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Leading hex digits for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_content_addressed() {
        assert_eq!(Hash::digest(b"node"), Hash::digest(b"node"));
        assert_ne!(Hash::digest(b"node"), Hash::digest(b"other"));
        assert!(!Hash::digest(b"").is_zero());
    }

    #[test]
    fn test_hex_forms() {
        let hash = Hash::digest(b"test data");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
        assert_eq!(Hash::from_hex(&format!("0x{}", hex)).unwrap(), hash);
        assert_eq!(Hash::from_hex(&hex.to_uppercase()).unwrap(), hash);
        assert!(hex.starts_with(&hash.short()));
        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn test_wrong_lengths_are_rejected() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"a".repeat(66)).is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
        assert!(Hash::from_slice(&[0; 31]).is_none());
        assert_eq!(Hash::from_slice(&[0; 32]), Some(Hash::ZERO));
    }
}
