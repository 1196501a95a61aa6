//! `download`: fetch a file by content hash from one or more nodes.

use std::sync::Arc;

use anyhow::Result;

use meshfile_core::config::MeshfileConfig;
use meshfile_services::{ChunkStore, Downloader, TracingObserver};

pub async fn run(
    config: &MeshfileConfig,
    hash: &str,
    name: &str,
    servers: &[String],
) -> Result<()> {
    let dl = &config.download;
    let store = ChunkStore::new(&dl.chunk_dir)?;
    let downloader = Downloader::new(store, &dl.download_dir, Arc::new(TracingObserver))
        .with_workers(dl.worker_count())
        .with_request_timeout(dl.request_timeout());

    let path = downloader.download(hash, name, servers).await?;
    println!("Downloaded {} from {} node(s) to {}", name, servers.len(), path.display());
    Ok(())
}
