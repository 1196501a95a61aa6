//! meshfile integration test harness.
//!
//! Every test runs real nodes on loopback (`127.0.0.1:0`) inside the test
//! process. Nothing external is required:
//!
//!   cargo test --test integration
//!
//! Each test owns its temp directories and stops the nodes it starts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use meshfile_core::crypto::hash_hex;
use meshfile_core::wire::{decode, encode_line, Message};
use meshfile_services::{
    ChunkStore, Downloader, NodeContext, NodeServer, RecordingObserver,
};

mod server;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh, empty temp directory unique to this process and call.
pub fn temp_dir(tag: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir()
        .join(format!("meshfile-it-{}-{}-{}", tag, std::process::id(), id));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic non-repeating-ish bytes so misordered chunks are detectable.
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + i / 4096) % 251) as u8 ^ seed)
        .collect()
}

/// A node serving a shared directory on an ephemeral loopback port.
pub struct Node {
    pub addr: String,
    pub dir: PathBuf,
    pub observer: RecordingObserver,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl Node {
    pub async fn start(tag: &str, files: &[(&str, &[u8])]) -> Node {
        let dir = temp_dir(tag);
        let shared = dir.join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        for (name, data) in files {
            std::fs::write(shared.join(name), data).unwrap();
        }

        let observer = RecordingObserver::new();
        let ctx = Arc::new(NodeContext {
            shared_dir: shared,
            store: ChunkStore::new(dir.join("chunks")).unwrap(),
            observer: Arc::new(observer.clone()),
        });
        let server = NodeServer::bind("127.0.0.1:0", ctx).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let (shutdown, _) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(shutdown.clone()));
        Node {
            addr,
            dir,
            observer,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// A client-side workspace: chunk store plus output directory.
pub struct Client {
    pub dir: PathBuf,
    pub observer: RecordingObserver,
}

impl Client {
    pub fn new(tag: &str) -> Client {
        Client {
            dir: temp_dir(tag),
            observer: RecordingObserver::new(),
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.join("out")
    }

    pub fn downloader(&self, workers: usize) -> Downloader {
        let store = ChunkStore::new(self.dir.join("chunks")).unwrap();
        Downloader::new(store, self.out_dir(), Arc::new(self.observer.clone())).with_workers(workers)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Scripted peer that answers every request with `respond(request)`.
/// Used to stand in for a misbehaving node.
pub async fn spawn_fake_node<F>(respond: F) -> (String, JoinHandle<()>)
where
    F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let respond = Arc::new(respond);

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let (r, mut w) = stream.into_split();
                let mut lines = BufReader::new(r).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Ok(req) = decode(line.as_bytes()) else { continue };
                    if let Some(resp) = respond(req) {
                        let Ok(bytes) = encode_line(&resp) else { break };
                        if w.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });
    (addr, handle)
}

pub fn sha(data: &[u8]) -> String {
    hash_hex(data)
}
