//! `metadata`: ask a node for one file's chunk list by name.

use anyhow::Result;

use meshfile_core::config::MeshfileConfig;
use meshfile_services::PeerConnection;

pub async fn run(config: &MeshfileConfig, addr: &str, name: &str) -> Result<()> {
    let mut conn = PeerConnection::connect(addr, config.download.request_timeout()).await?;
    let chunks = conn.file_metadata(name).await?;

    // An empty list is how a node says it does not host the file.
    if chunks.is_empty() {
        println!("{addr} does not host {name}.");
        return Ok(());
    }

    println!("{name} ({} chunks):", chunks.len());
    for id in &chunks {
        println!("  {id}");
    }
    Ok(())
}
