//! Catalog builder: snapshots the shared directory.
//!
//! The catalog is rebuilt from disk on every request, re-splitting each
//! file into its hash-named chunk namespace. Nothing is cached between
//! requests, so a catalog is never stale.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use meshfile_core::catalog::{Catalog, FileEntry};
use meshfile_core::crypto::hash_file;

use crate::chunk_store::ChunkStore;

/// Build a catalog of every regular file directly under `directory`.
///
/// Subdirectories are skipped. Fail-fast: the first file that cannot be
/// hashed or split aborts the whole build. Entries are ordered by name.
pub fn build_catalog(directory: &Path, store: &ChunkStore) -> Result<Catalog> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(directory)
        .with_context(|| format!("failed to read directory: {}", directory.display()))?
    {
        let entry = entry.with_context(|| format!("failed to list {}", directory.display()))?;
        let path = entry.path();
        let meta = fs::metadata(&path)
            .with_context(|| format!("failed to stat file: {}", path.display()))?;
        if meta.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let hash =
            hash_file(&path).with_context(|| format!("failed to hash {}", path.display()))?;
        let manifest = store
            .split(&path, &hash)
            .with_context(|| format!("failed to split {}", path.display()))?;
        files.push(FileEntry {
            name: manifest.name,
            size: manifest.size,
            hash,
            chunks: manifest.chunks,
        });
    }

    tracing::debug!(dir = %directory.display(), files = files.len(), "catalog built");
    Ok(Catalog { files })
}
