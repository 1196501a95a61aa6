//! `serve`: run a node until ctrl-c.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use meshfile_core::config::MeshfileConfig;
use meshfile_services::{ChunkStore, NodeContext, NodeServer, TracingObserver};

pub async fn run(config: &MeshfileConfig) -> Result<()> {
    let node = &config.node;
    std::fs::create_dir_all(&node.shared_dir).with_context(|| {
        format!("failed to create shared dir: {}", node.shared_dir.display())
    })?;
    let store = ChunkStore::new(&node.chunk_dir)?;
    tracing::info!(
        shared = %node.shared_dir.display(),
        chunks = %store.root().display(),
        "node directories ready"
    );

    let ctx = Arc::new(NodeContext {
        shared_dir: node.shared_dir.clone(),
        store,
        observer: Arc::new(TracingObserver),
    });
    let server = NodeServer::bind(&node.listen_addr, ctx).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx.clone()));

    server.run(shutdown_tx).await
}

/// Send shutdown once `signal` fires. If the handler could not be installed
/// the node keeps running and never shuts down on its own.
async fn forward_shutdown(
    signal: impl Future<Output = std::io::Result<()>>,
    shutdown: broadcast::Sender<()>,
) {
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "failed to listen for ctrl-c, shutdown signal disabled");
        return;
    }
    tracing::info!("shutdown signal received");
    let _ = shutdown.send(());
}
