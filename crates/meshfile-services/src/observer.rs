//! Node events and the observer they are reported to.
//!
//! The dispatcher and the download orchestrator never log through a global
//! handle; they report to the `NodeObserver` they were constructed with.
//! `TracingObserver` is what the daemon installs.

use std::sync::{Arc, Mutex};

/// Something worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    PeerConnected { peer: String },
    PeerDisconnected { peer: String },
    MalformedMessage { peer: String, error: String },
    UnexpectedMessage { peer: String, msg_type: &'static str },
    RequestServed { peer: String, msg_type: &'static str },
    RequestDropped { peer: String, reason: String },
    WriteFailed { peer: String, error: String },
    /// The connection was closed because reading the next frame failed.
    ReadFailed { peer: String, error: String },
    ClosedForShutdown { peer: String },
    ChunkVerified { file_hash: String, chunk_id: String, server: String },
    ChunkRejected { file_hash: String, chunk_id: String, server: String },
    DownloadStarted { file_hash: String, chunks: usize, servers: usize },
    DownloadFinished { file_hash: String, path: String },
    DownloadFailed { file_hash: String, error: String },
    /// A corrupt output file or chunk namespace could not be removed.
    CleanupFailed { path: String, error: String },
}

pub trait NodeObserver: Send + Sync {
    fn on_event(&self, event: NodeEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl NodeObserver for TracingObserver {
    fn on_event(&self, event: NodeEvent) {
        use NodeEvent::*;
        match event {
            PeerConnected { peer } => tracing::info!(%peer, "peer connected"),
            PeerDisconnected { peer } => tracing::info!(%peer, "peer disconnected"),
            MalformedMessage { peer, error } => {
                tracing::warn!(%peer, %error, "malformed message skipped")
            }
            UnexpectedMessage { peer, msg_type } => {
                tracing::warn!(%peer, msg_type, "unexpected message type ignored")
            }
            RequestServed { peer, msg_type } => tracing::debug!(%peer, msg_type, "request served"),
            RequestDropped { peer, reason } => {
                tracing::warn!(%peer, %reason, "request dropped, no response sent")
            }
            WriteFailed { peer, error } => tracing::warn!(%peer, %error, "response write failed"),
            ReadFailed { peer, error } => {
                tracing::debug!(%peer, %error, "read failed, closing connection")
            }
            ClosedForShutdown { peer } => tracing::debug!(%peer, "connection closing for shutdown"),
            ChunkVerified { file_hash, chunk_id, server } => {
                tracing::debug!(hash = %file_hash, %chunk_id, %server, "chunk verified")
            }
            ChunkRejected { file_hash, chunk_id, server } => {
                tracing::warn!(hash = %file_hash, %chunk_id, %server, "chunk failed integrity check")
            }
            DownloadStarted { file_hash, chunks, servers } => {
                tracing::info!(hash = %file_hash, chunks, servers, "download started")
            }
            DownloadFinished { file_hash, path } => {
                tracing::info!(hash = %file_hash, %path, "download complete")
            }
            DownloadFailed { file_hash, error } => {
                tracing::error!(hash = %file_hash, %error, "download failed")
            }
            CleanupFailed { path, error } => {
                tracing::warn!(%path, %error, "failed to remove corrupt download data")
            }
        }
    }
}

/// Keeps every event in memory. Used by tests to assert on behaviour.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<NodeEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&NodeEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl NodeObserver for RecordingObserver {
    fn on_event(&self, event: NodeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
