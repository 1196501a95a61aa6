//! Per-connection request dispatcher.
//!
//! One dispatcher loop runs per accepted connection. It holds no state
//! across requests: every catalog is rebuilt from the shared directory,
//! every chunk is read straight from the store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use meshfile_core::catalog::Catalog;
use meshfile_core::crypto::hash_hex;
use meshfile_core::wire::{decode, Message};

use crate::catalog::build_catalog;
use crate::chunk_store::ChunkStore;
use crate::framing::{write_message, FrameReader};
use crate::observer::{NodeEvent, NodeObserver};

/// What a serving node needs to answer requests.
pub struct NodeContext {
    pub shared_dir: PathBuf,
    pub store: ChunkStore,
    pub observer: Arc<dyn NodeObserver>,
}

/// Reads framed messages, routes them by type, writes responses back.
#[derive(Clone)]
pub struct ConnectionDispatcher {
    ctx: Arc<NodeContext>,
}

impl ConnectionDispatcher {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Serve one connection until the peer disconnects, a read fails, or
    /// shutdown fires. None of these are errors to the rest of the node.
    pub async fn serve<S>(&self, stream: S, peer: String, mut shutdown: broadcast::Receiver<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let observer = &self.ctx.observer;
        observer.on_event(NodeEvent::PeerConnected { peer: peer.clone() });

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = FrameReader::new(reader);

        loop {
            let frame = tokio::select! {
                _ = shutdown.recv() => {
                    observer.on_event(NodeEvent::ClosedForShutdown { peer: peer.clone() });
                    break;
                }
                frame = reader.next_frame() => frame,
            };

            let decoded = match frame {
                Ok(Some(line)) => decode(line),
                Ok(None) => break,
                Err(e) => {
                    observer.on_event(NodeEvent::ReadFailed {
                        peer: peer.clone(),
                        error: e.to_string(),
                    });
                    break;
                }
            };

            let msg = match decoded {
                Ok(msg) => msg,
                Err(e) => {
                    observer.on_event(NodeEvent::MalformedMessage {
                        peer: peer.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let msg_type = msg.type_name();
            let Some(response) = self.handle(msg, &peer).await else {
                continue;
            };

            match write_message(&mut writer, &response).await {
                Ok(()) => observer.on_event(NodeEvent::RequestServed {
                    peer: peer.clone(),
                    msg_type,
                }),
                Err(e) => observer.on_event(NodeEvent::WriteFailed {
                    peer: peer.clone(),
                    error: e.to_string(),
                }),
            }
        }

        observer.on_event(NodeEvent::PeerDisconnected { peer });
    }

    /// Route one request. `None` means no response is sent.
    pub async fn handle(&self, msg: Message, peer: &str) -> Option<Message> {
        let result = match msg {
            Message::CatalogRequest => self.catalog().await.map(Message::CatalogResponse),

            Message::FileMetadataRequest { file_name } => self.catalog().await.map(|catalog| {
                let chunks = catalog
                    .find_by_name(&file_name)
                    .map(|entry| entry.chunks.clone())
                    .unwrap_or_default();
                Message::FileMetadataResponse { file_name, chunks }
            }),

            Message::ChunkRequest {
                file_hash,
                chunk_id,
            } => self.chunk(file_hash, chunk_id).await,

            other => {
                self.ctx.observer.on_event(NodeEvent::UnexpectedMessage {
                    peer: peer.to_string(),
                    msg_type: other.type_name(),
                });
                return None;
            }
        };

        match result {
            Ok(response) => Some(response),
            Err(e) => {
                self.ctx.observer.on_event(NodeEvent::RequestDropped {
                    peer: peer.to_string(),
                    reason: format!("{e:#}"),
                });
                None
            }
        }
    }

    async fn catalog(&self) -> anyhow::Result<Catalog> {
        let dir = self.ctx.shared_dir.clone();
        let store = self.ctx.store.clone();
        tokio::task::spawn_blocking(move || build_catalog(&dir, &store))
            .await
            .context("catalog task failed")?
    }

    /// Chunks are resolved through this node's own catalog: a miss on a
    /// hash the catalog lists (not yet split since start) triggers one
    /// rebuild, then the read is retried.
    async fn chunk(&self, file_hash: String, chunk_id: String) -> anyhow::Result<Message> {
        let mut data = self.read_chunk(&file_hash, &chunk_id).await?;
        if data.is_none() && self.catalog().await?.find_entry(&file_hash).is_some() {
            data = self.read_chunk(&file_hash, &chunk_id).await?;
        }
        let data =
            data.with_context(|| format!("chunk {chunk_id} of {file_hash} not found"))?;

        Ok(Message::ChunkResponse {
            hash: hash_hex(&data),
            chunk_id,
            data,
        })
    }

    async fn read_chunk(&self, file_hash: &str, chunk_id: &str) -> anyhow::Result<Option<Bytes>> {
        let store = self.ctx.store.clone();
        let (hash, id) = (file_hash.to_string(), chunk_id.to_string());
        tokio::task::spawn_blocking(move || store.get(&hash, &id))
            .await
            .context("chunk read task failed")?
    }
}
