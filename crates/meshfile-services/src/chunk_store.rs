//! Content-namespaced chunk store.
//!
//! Chunks are stored per file, under the file's content hash:
//!   {root}/{file_hash}/chunk_0
//!   {root}/{file_hash}/chunk_1
//!   {root}/{file_hash}/metadata.json
//!
//! `metadata.json` is the manifest: original name, size, hash, and chunk
//! order. Reconstruction always follows the manifest order, never the
//! directory listing.

use std::ffi::OsStr;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use memmap2::Mmap;

use meshfile_core::catalog::{chunk_id, is_valid_chunk_id, FileEntry, CHUNK_SIZE};
use meshfile_core::crypto::is_content_hash;

/// File name of the per-namespace manifest.
pub const MANIFEST_FILE: &str = "metadata.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// The manifest is the same record the catalog advertises.
pub type Manifest = FileEntry;

/// Chunk store rooted at one directory.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create chunk store root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split `file_path` into fixed-size chunks under `content_hash`, and
    /// write the manifest. Re-splitting an unchanged file yields the same
    /// chunk ids and bytes.
    pub fn split(&self, file_path: &Path, content_hash: &str) -> Result<Manifest> {
        let dir = self.namespace_dir(content_hash)?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create chunk dir: {}", dir.display()))?;

        let mut file = fs::File::open(file_path)
            .with_context(|| format!("failed to open file: {}", file_path.display()))?;
        let name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("file name is not valid UTF-8")?
            .to_string();

        let mut chunks = Vec::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = read_full(&mut file, &mut buf)
                .with_context(|| format!("error reading file: {}", file_path.display()))?;
            if n == 0 {
                break;
            }
            let id = chunk_id(chunks.len());
            write_atomic(&dir.join(&id), &buf[..n])?;
            chunks.push(id);
            size += n as u64;
            if n < CHUNK_SIZE {
                break;
            }
        }

        let manifest = Manifest {
            name,
            size,
            hash: content_hash.to_string(),
            chunks,
        };
        self.write_manifest(&manifest)?;
        tracing::debug!(
            file = %file_path.display(),
            hash = %content_hash,
            chunks = manifest.chunks.len(),
            "file split"
        );
        Ok(manifest)
    }

    /// Assemble the file described by `content_hash`'s manifest into
    /// `output_dir`, named per the manifest. Returns the written path.
    pub fn reconstruct(&self, output_dir: &Path, content_hash: &str) -> Result<PathBuf> {
        let manifest = self
            .read_manifest(content_hash)?
            .with_context(|| format!("no manifest for {content_hash}"))?;
        if manifest.name.is_empty()
            || Path::new(&manifest.name).file_name() != Some(OsStr::new(&manifest.name))
        {
            bail!("manifest for {content_hash} has an unusable file name: {:?}", manifest.name);
        }

        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;
        let dir = self.namespace_dir(content_hash)?;
        let output_path = output_dir.join(&manifest.name);
        let tmp_path = output_dir.join(format!(".{}.partial", manifest.name));

        let result = (|| -> Result<u64> {
            let mut out = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut written = 0u64;
            for id in &manifest.chunks {
                if !is_valid_chunk_id(id) {
                    bail!("manifest lists invalid chunk id {id:?}");
                }
                let chunk_path = dir.join(id);
                let mut chunk = fs::File::open(&chunk_path)
                    .with_context(|| format!("failed to open chunk: {}", chunk_path.display()))?;
                written += std::io::copy(&mut chunk, &mut out)
                    .with_context(|| format!("failed to copy chunk: {}", chunk_path.display()))?;
            }
            out.sync_all().context("failed to sync output file")?;
            Ok(written)
        })();

        let written = match result {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        if written != manifest.size {
            let _ = fs::remove_file(&tmp_path);
            bail!(
                "reconstructed {} bytes for {}, manifest says {}",
                written,
                content_hash,
                manifest.size
            );
        }

        fs::rename(&tmp_path, &output_path).with_context(|| {
            format!("failed to rename {} to {}", tmp_path.display(), output_path.display())
        })?;
        Ok(output_path)
    }

    /// Read one chunk. Returns None if not present.
    pub fn get(&self, content_hash: &str, chunk_id: &str) -> Result<Option<Bytes>> {
        let path = self.chunk_path(content_hash, chunk_id)?;
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path)
            .with_context(|| format!("failed to open chunk: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat chunk: {}", path.display()))?
            .len();
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }

        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap chunk: {}", path.display()))?
        };
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Store one chunk. Writes are atomic: temp file, then rename.
    pub fn put(&self, content_hash: &str, chunk_id: &str, data: &[u8]) -> Result<()> {
        let path = self.chunk_path(content_hash, chunk_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create chunk dir: {}", parent.display()))?;
        }
        write_atomic(&path, data)?;
        tracing::trace!(hash = %content_hash, chunk_id, "chunk stored");
        Ok(())
    }

    pub fn has(&self, content_hash: &str, chunk_id: &str) -> bool {
        self.chunk_path(content_hash, chunk_id)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let dir = self.namespace_dir(&manifest.hash)?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create chunk dir: {}", dir.display()))?;
        let bytes = serde_json::to_vec(manifest).context("failed to serialize manifest")?;
        write_atomic(&dir.join(MANIFEST_FILE), &bytes)
    }

    pub fn read_manifest(&self, content_hash: &str) -> Result<Option<Manifest>> {
        let path = self.namespace_dir(content_hash)?.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Remove a whole namespace. Missing namespaces are not an error.
    pub fn remove(&self, content_hash: &str) -> Result<()> {
        let dir = self.namespace_dir(content_hash)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", dir.display())),
        }
    }

    fn namespace_dir(&self, content_hash: &str) -> Result<PathBuf> {
        if !is_content_hash(content_hash) {
            bail!("invalid content hash {content_hash:?}");
        }
        Ok(self.root.join(content_hash))
    }

    fn chunk_path(&self, content_hash: &str, chunk_id: &str) -> Result<PathBuf> {
        if !is_valid_chunk_id(chunk_id) || chunk_id == MANIFEST_FILE {
            bail!("invalid chunk id {chunk_id:?}");
        }
        Ok(self.namespace_dir(content_hash)?.join(chunk_id))
    }
}

/// Fill `buf` as far as the reader allows. Returns bytes read; short only at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Concurrent catalog builds may re-split the same file at once, so every
/// writer gets its own temp name. Identical bytes make the last rename win
/// harmlessly.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("tmp{seq}"));
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(data).context("failed to write chunk data")?;
        file.sync_all().context("failed to sync chunk to disk")?;
    }
    fs::rename(&tmp_path, path).with_context(|| {
        format!("failed to rename {} to {}", tmp_path.display(), path.display())
    })
}
