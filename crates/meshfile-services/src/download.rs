//! Download orchestrator: discovery, assignment, bounded fetch, reconstruction.
//!
//! A download runs in one pass:
//!   1. Ask the first server for its catalog and find the requested hash.
//!   2. Assign chunk `i` to `servers[i % servers.len()]`.
//!   3. A fixed pool of workers drains a shared job queue. Each worker keeps
//!      one connection per server it has talked to.
//!   4. Every chunk is hash-checked and written to the store as it arrives.
//!   5. Once all workers are joined, the file is reconstructed from the
//!      manifest and checked against the requested hash.
//!
//! The first worker error stops further dequeuing and fails the download.
//! Nothing is retried.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use meshfile_core::catalog::{chunk_count, CHUNK_SIZE};
use meshfile_core::crypto::{hash_file, hash_hex};

use crate::chunk_store::{ChunkStore, Manifest};
use crate::client::{fetch_catalog, PeerConnection};
use crate::error::DownloadError;
use crate::observer::{NodeEvent, NodeObserver};

pub const DEFAULT_WORKERS: usize = 4;

/// Server index for each of `chunk_count` chunks, round-robin.
pub fn assign_round_robin(chunk_count: usize, server_count: usize) -> Vec<usize> {
    if server_count == 0 {
        return Vec::new();
    }
    (0..chunk_count).map(|i| i % server_count).collect()
}

#[derive(Debug)]
struct Job {
    chunk_id: String,
    server: usize,
}

/// State shared by the workers of one download.
struct FetchPlan {
    file_hash: String,
    servers: Vec<String>,
    store: ChunkStore,
    timeout: Option<Duration>,
    observer: Arc<dyn NodeObserver>,
    jobs: Mutex<VecDeque<Job>>,
    failed: AtomicBool,
}

impl FetchPlan {
    /// Next job, or None once the queue is empty or a worker has failed.
    async fn next_job(&self) -> Option<Job> {
        if self.failed.load(Ordering::Acquire) {
            return None;
        }
        self.jobs.lock().await.pop_front()
    }
}

pub struct Downloader {
    store: ChunkStore,
    output_dir: PathBuf,
    workers: usize,
    request_timeout: Option<Duration>,
    observer: Arc<dyn NodeObserver>,
}

impl Downloader {
    pub fn new(
        store: ChunkStore,
        output_dir: impl Into<PathBuf>,
        observer: Arc<dyn NodeObserver>,
    ) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            workers: DEFAULT_WORKERS,
            request_timeout: None,
            observer,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fetch the file with `content_hash` from `servers` and write it to the
    /// output directory as `file_name`. Returns the written path.
    pub async fn download(
        &self,
        content_hash: &str,
        file_name: &str,
        servers: &[String],
    ) -> Result<PathBuf, DownloadError> {
        let result = self.run(content_hash, file_name, servers).await;
        match &result {
            Ok(path) => self.observer.on_event(NodeEvent::DownloadFinished {
                file_hash: content_hash.to_string(),
                path: path.display().to_string(),
            }),
            Err(e) => self.observer.on_event(NodeEvent::DownloadFailed {
                file_hash: content_hash.to_string(),
                error: e.to_string(),
            }),
        }
        result
    }

    async fn run(
        &self,
        content_hash: &str,
        file_name: &str,
        servers: &[String],
    ) -> Result<PathBuf, DownloadError> {
        if !is_plain_file_name(file_name) {
            return Err(DownloadError::InvalidFileName(file_name.to_string()));
        }
        let seed = servers.first().ok_or(DownloadError::NoServers)?;

        // ── Discovery ──
        let catalog = fetch_catalog(seed, self.request_timeout).await?;
        let entry = catalog
            .find_entry(content_hash)
            .cloned()
            .ok_or_else(|| DownloadError::FileNotFound(content_hash.to_string()))?;
        if entry.chunks.len() != chunk_count(entry.size) {
            return Err(DownloadError::UnexpectedResponse {
                addr: seed.clone(),
                expected: "catalog entry whose chunk list matches its size",
                got: format!("{} chunks for {} bytes", entry.chunks.len(), entry.size),
            });
        }

        self.observer.on_event(NodeEvent::DownloadStarted {
            file_hash: content_hash.to_string(),
            chunks: entry.chunks.len(),
            servers: servers.len(),
        });

        // ── Assignment ──
        let jobs: VecDeque<Job> = entry
            .chunks
            .iter()
            .zip(assign_round_robin(entry.chunks.len(), servers.len()))
            .map(|(id, server)| Job {
                chunk_id: id.clone(),
                server,
            })
            .collect();

        let plan = Arc::new(FetchPlan {
            file_hash: content_hash.to_string(),
            servers: servers.to_vec(),
            store: self.store.clone(),
            timeout: self.request_timeout,
            observer: self.observer.clone(),
            jobs: Mutex::new(jobs),
            failed: AtomicBool::new(false),
        });

        // ── Fetch ──
        let mut pool = JoinSet::new();
        for _ in 0..self.workers.min(entry.chunks.len()) {
            pool.spawn(worker(plan.clone()));
        }

        let mut first_error = None;
        while let Some(joined) = pool.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(DownloadError::Worker(e.to_string())),
            };
            if let Err(e) = outcome {
                plan.failed.store(true, Ordering::Release);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if let Some(missing) = entry
            .chunks
            .iter()
            .find(|id| !self.store.has(content_hash, id))
        {
            return Err(DownloadError::Store(format!(
                "chunk {missing} missing after all workers finished"
            )));
        }

        // ── Reconstruction ──
        let manifest = Manifest {
            name: file_name.to_string(),
            size: entry.size,
            hash: content_hash.to_string(),
            chunks: entry.chunks,
        };
        let store = self.store.clone();
        let output_dir = self.output_dir.clone();
        let observer = self.observer.clone();
        tokio::task::spawn_blocking(move || {
            reconstruct_verified(&store, &output_dir, &manifest, observer.as_ref())
        })
        .await
            .map_err(|e| DownloadError::Worker(e.to_string()))?
    }
}

/// A name that `Path::file_name` maps back to itself: no separators,
/// no `.` or `..`, not empty.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name))
}

/// Drain jobs until the queue is empty or some worker fails.
async fn worker(plan: Arc<FetchPlan>) -> Result<(), DownloadError> {
    let mut conns: Vec<Option<PeerConnection>> = plan.servers.iter().map(|_| None).collect();

    while let Some(job) = plan.next_job().await {
        let fetched = match conns[job.server].take() {
            Some(conn) => fetch_chunk(&plan, conn, &job).await,
            None => match PeerConnection::connect(&plan.servers[job.server], plan.timeout).await {
                Ok(conn) => fetch_chunk(&plan, conn, &job).await,
                Err(e) => Err(e),
            },
        };
        match fetched {
            Ok(conn) => conns[job.server] = Some(conn),
            Err(e) => {
                plan.failed.store(true, Ordering::Release);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Fetch, verify, and store one chunk. Hands the connection back on success.
async fn fetch_chunk(
    plan: &FetchPlan,
    mut conn: PeerConnection,
    job: &Job,
) -> Result<PeerConnection, DownloadError> {
    let reply = conn.chunk(&plan.file_hash, &job.chunk_id).await?;

    if reply.data.len() > CHUNK_SIZE {
        return Err(DownloadError::OversizedChunk {
            addr: conn.addr().to_string(),
            chunk_id: reply.chunk_id,
            len: reply.data.len(),
        });
    }

    let actual = hash_hex(&reply.data);
    if actual != reply.hash {
        plan.observer.on_event(NodeEvent::ChunkRejected {
            file_hash: plan.file_hash.clone(),
            chunk_id: reply.chunk_id.clone(),
            server: conn.addr().to_string(),
        });
        return Err(DownloadError::IntegrityFailure {
            file_hash: plan.file_hash.clone(),
            chunk_id: Some(reply.chunk_id),
            expected: reply.hash,
            actual,
        });
    }

    let store = plan.store.clone();
    let (hash, id, data) = (plan.file_hash.clone(), reply.chunk_id.clone(), reply.data);
    tokio::task::spawn_blocking(move || store.put(&hash, &id, &data))
        .await
        .map_err(|e| DownloadError::Worker(e.to_string()))?
        .map_err(DownloadError::store)?;

    plan.observer.on_event(NodeEvent::ChunkVerified {
        file_hash: plan.file_hash.clone(),
        chunk_id: reply.chunk_id,
        server: conn.addr().to_string(),
    });
    Ok(conn)
}

/// Write the manifest, assemble the file, and check the whole-file hash.
/// A file that does not hash to the manifest's hash is removed, along
/// with the chunks it was built from.
fn reconstruct_verified(
    store: &ChunkStore,
    output_dir: &Path,
    manifest: &Manifest,
    observer: &dyn NodeObserver,
) -> Result<PathBuf, DownloadError> {
    store.write_manifest(manifest).map_err(DownloadError::store)?;
    let path = store
        .reconstruct(output_dir, &manifest.hash)
        .map_err(DownloadError::store)?;

    let actual = hash_file(&path).map_err(|e| {
        DownloadError::Store(format!("failed to hash {}: {e}", path.display()))
    })?;
    if actual != manifest.hash {
        if let Err(e) = std::fs::remove_file(&path) {
            observer.on_event(NodeEvent::CleanupFailed {
                path: path.display().to_string(),
                error: e.to_string(),
            });
        }
        // The stored chunks produced a bad file; a later attempt starts clean.
        if let Err(e) = store.remove(&manifest.hash) {
            observer.on_event(NodeEvent::CleanupFailed {
                path: store.root().join(&manifest.hash).display().to_string(),
                error: format!("{e:#}"),
            });
        }
        return Err(DownloadError::IntegrityFailure {
            file_hash: manifest.hash.clone(),
            chunk_id: None,
            expected: manifest.hash.clone(),
            actual,
        });
    }
    Ok(path)
}
