//! meshfiled: run a meshfile node, or pull files from peers.

use anyhow::{Context, Result};

use meshfile_core::config::MeshfileConfig;

mod cmd;

fn print_usage() {
    println!("Usage: meshfiled [--listen <addr>] <command>");
    println!();
    println!("Commands:");
    println!("  serve                              Serve the shared directory");
    println!("  catalog <addr>                     List files hosted by a node");
    println!("  metadata <addr> <name>             Show chunk ids for a file by name");
    println!("  download <hash> <name> <addr>...   Fetch a file from one or more nodes");
    println!();
    println!("Options:");
    println!("  --listen <addr>   Override node.listen_addr for serve");
    println!();
    println!("Config: $MESHFILE_CONFIG or ~/.config/meshfile/config.toml");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MeshfileConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshfileConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshfileConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--listen" {
            i += 1;
            config.node.listen_addr = args
                .get(i)
                .context("--listen requires an address")?
                .clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["serve"] => cmd::serve::run(&config).await,
        ["catalog", addr] => cmd::catalog::run(&config, addr).await,
        ["metadata", addr, name] => cmd::metadata::run(&config, addr, name).await,
        ["download", hash, name, servers @ ..] if !servers.is_empty() => {
            let servers: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
            cmd::download::run(&config, hash, name, &servers).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
