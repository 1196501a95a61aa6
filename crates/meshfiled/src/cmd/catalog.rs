//! `catalog`: print a remote node's file list.

use anyhow::Result;

use meshfile_core::config::MeshfileConfig;
use meshfile_services::fetch_catalog;

pub async fn run(config: &MeshfileConfig, addr: &str) -> Result<()> {
    let catalog = fetch_catalog(addr, config.download.request_timeout()).await?;

    if catalog.files.is_empty() {
        println!("{addr} hosts no files.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Catalog of {} ({} files, {} bytes)", addr, catalog.files.len(), catalog.total_bytes());
    println!("═══════════════════════════════════════");
    for f in &catalog.files {
        println!("  ┌─ {}", f.name);
        println!("  │  hash   : {}", f.hash);
        println!("  │  size   : {} bytes", f.size);
        println!("  └─ chunks : {}", f.chunks.len());
    }
    Ok(())
}
