//! Fixed-length content hashes
//!
//! A [`ContentHash`] is 256 bits sliced into one-byte units. The first unit
//! selects the prefix index block, the next two are the fast-compare bytes
//! stored inline in each descriptor.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Number of hash units (bytes) in a content hash
pub const HASH_LEN: usize = 32;

/// A 256-bit content hash, compared lexicographically unit by unit
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        ContentHash(bytes)
    }

    /// SHA-256 of the given content
    pub fn digest(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        ContentHash(hasher.finalize().into())
    }

    /// SHA-256 of everything `reader` yields
    pub fn digest_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = Sha256::new();
        std::io::copy(&mut reader, &mut hasher)?;
        Ok(ContentHash(hasher.finalize().into()))
    }

    /// Build a hash from a slice that must be exactly [`HASH_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            ArchiveError::InvalidHash(format!(
                "expected {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            ))
        })?;
        Ok(ContentHash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Unit at the given depth
    #[inline]
    pub fn unit(&self, depth: usize) -> u8 {
        self.0[depth]
    }

    /// Leading byte, selecting the prefix block
    #[inline]
    pub fn prefix(&self) -> u8 {
        self.0[0]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Number of leading units shared with `other`
    pub fn common_prefix_len(&self, other: &ContentHash) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl From<[u8; HASH_LEN]> for ContentHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        ContentHash(bytes)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ArchiveError::InvalidHash(format!("{}: {}", s, e)))?;
        ContentHash::from_slice(&bytes)
    }
}
