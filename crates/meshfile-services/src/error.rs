//! Client-side error taxonomy.

use std::time::Duration;

use meshfile_core::wire::WireError;

use crate::framing::SendError;

/// Why a download (or a single client request) failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no servers given")]
    NoServers,

    /// The output name must be one plain path component.
    #[error("invalid output file name {0:?}")]
    InvalidFileName(String),

    #[error("connection to {addr} failed: {source}")]
    ConnectionFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed message from {addr}: {source}")]
    MalformedMessage {
        addr: String,
        #[source]
        source: WireError,
    },

    #[error("could not encode request: {0}")]
    EncodingFailure(#[source] WireError),

    #[error("{addr} sent {got}, expected {expected}")]
    UnexpectedResponse {
        addr: String,
        expected: &'static str,
        got: String,
    },

    #[error("file {0} not found in catalog")]
    FileNotFound(String),

    /// `chunk_id` is `None` when the reconstructed file as a whole failed.
    #[error(
        "integrity check failed for {} of {file_hash}: expected {expected}, got {actual}",
        .chunk_id.as_deref().unwrap_or("reconstructed file")
    )]
    IntegrityFailure {
        file_hash: String,
        chunk_id: Option<String>,
        expected: String,
        actual: String,
    },

    #[error("{addr} sent {len} bytes for {chunk_id}, above the chunk size limit")]
    OversizedChunk {
        addr: String,
        chunk_id: String,
        len: usize,
    },

    #[error("no response from {addr} within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("chunk store: {0}")]
    Store(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl DownloadError {
    pub(crate) fn from_send(addr: &str, e: SendError) -> Self {
        match e {
            SendError::Wire(w) => DownloadError::EncodingFailure(w),
            SendError::Io(source) => DownloadError::ConnectionFailure {
                addr: addr.to_string(),
                source,
            },
        }
    }

    pub(crate) fn store(e: anyhow::Error) -> Self {
        DownloadError::Store(format!("{e:#}"))
    }
}
