//! SHA-256 content hashing.
//!
//! Every content identifier in meshfile is a lowercase hex SHA-256 digest:
//! whole-file hashes name chunk namespaces, per-chunk hashes travel with
//! chunk data so the receiver can verify it independently of TCP.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hash a byte slice, returning the hex-encoded SHA-256 digest.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash a file's contents without loading it into memory.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// True if `s` looks like a hex SHA-256 digest as produced by this module.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Incremental SHA-256 hasher for payloads that arrive in pieces.
///
/// # Example
/// ```
/// use meshfile_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize_hex(), meshfile_core::crypto::hash_hex(b"hello world"));
/// ```
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
