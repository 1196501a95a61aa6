//! Catalog model: a node's self-reported inventory of hosted files.
//!
//! A `FileEntry` doubles as the on-disk manifest written next to a file's
//! chunks: same name, size, content hash, and ordered chunk ids.

use serde::{Deserialize, Serialize};

/// Maximum chunk payload size. Every chunk except possibly the last is
/// exactly this size.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// One hosted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Original file name, no directory components.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the whole file. Also the chunk namespace.
    pub hash: String,
    /// Chunk ids in byte order. Concatenating the chunks in this order
    /// reproduces the file exactly.
    pub chunks: Vec<String>,
}

/// Ordered list of hosted files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub files: Vec<FileEntry>,
}

impl Catalog {
    /// Resolve a content hash to its entry. Absence is not an error.
    pub fn find_entry(&self, hash: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.hash == hash)
    }

    /// Resolve a file name to its entry. First match wins.
    pub fn find_by_name(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Positional chunk id for the chunk at `index`.
pub fn chunk_id(index: usize) -> String {
    format!("chunk_{index}")
}

/// A chunk id is accepted only if it is a single, plain path component.
/// Chunk ids arrive from remote peers and are joined onto store paths.
pub fn is_valid_chunk_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// Number of chunks a file of `size` bytes splits into. Zero for empty files.
pub fn chunk_count(size: u64) -> usize {
    size.div_ceil(CHUNK_SIZE as u64) as usize
}
