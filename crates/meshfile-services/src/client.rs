//! Client side of the wire protocol: one connection, one request at a time.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use meshfile_core::catalog::Catalog;
use meshfile_core::wire::{decode, Message};

use crate::error::DownloadError;
use crate::framing::{write_message, FrameReader};

/// A verified-shape chunk reply. Integrity is checked by the caller.
#[derive(Debug)]
pub struct ChunkReply {
    pub chunk_id: String,
    pub data: Bytes,
    pub hash: String,
}

pub struct PeerConnection {
    addr: String,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Option<Duration>,
}

impl PeerConnection {
    /// Dial `addr`. `timeout` bounds the dial and every later request.
    pub async fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self, DownloadError> {
        let stream = bounded(addr, timeout, async {
            TcpStream::connect(addr)
                .await
                .map_err(|source| DownloadError::ConnectionFailure {
                    addr: addr.to_string(),
                    source,
                })
        })
        .await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr, error = %e, "set_nodelay failed");
        }
        let (r, w) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: FrameReader::new(r),
            writer: w,
            timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request and wait for one reply.
    pub async fn request(&mut self, msg: &Message) -> Result<Message, DownloadError> {
        let timeout = self.timeout;
        let addr = self.addr.clone();
        bounded(&addr, timeout, async {
            write_message(&mut self.writer, msg)
                .await
                .map_err(|e| DownloadError::from_send(&self.addr, e))?;

            let line = match self.reader.next_frame().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(DownloadError::ConnectionFailure {
                        addr: self.addr.clone(),
                        source: std::io::ErrorKind::UnexpectedEof.into(),
                    })
                }
                Err(source) => {
                    return Err(DownloadError::ConnectionFailure {
                        addr: self.addr.clone(),
                        source,
                    })
                }
            };
            decode(line).map_err(|source| DownloadError::MalformedMessage {
                addr: self.addr.clone(),
                source,
            })
        })
        .await
    }

    pub async fn catalog(&mut self) -> Result<Catalog, DownloadError> {
        match self.request(&Message::CatalogRequest).await? {
            Message::CatalogResponse(catalog) => Ok(catalog),
            other => Err(self.unexpected("CatalogResponse", &other)),
        }
    }

    /// Chunk ids for `file_name`. Empty means the server does not host it.
    pub async fn file_metadata(&mut self, file_name: &str) -> Result<Vec<String>, DownloadError> {
        let req = Message::FileMetadataRequest {
            file_name: file_name.to_string(),
        };
        match self.request(&req).await? {
            Message::FileMetadataResponse { chunks, .. } => Ok(chunks),
            other => Err(self.unexpected("FileMetadataResponse", &other)),
        }
    }

    pub async fn chunk(
        &mut self,
        file_hash: &str,
        chunk_id: &str,
    ) -> Result<ChunkReply, DownloadError> {
        let req = Message::ChunkRequest {
            file_hash: file_hash.to_string(),
            chunk_id: chunk_id.to_string(),
        };
        match self.request(&req).await? {
            Message::ChunkResponse {
                chunk_id: got,
                data,
                hash,
            } if got == chunk_id => Ok(ChunkReply {
                chunk_id: got,
                data,
                hash,
            }),
            Message::ChunkResponse { chunk_id: got, .. } => Err(DownloadError::UnexpectedResponse {
                addr: self.addr.clone(),
                expected: "ChunkResponse for the requested chunk",
                got: format!("ChunkResponse for {got}"),
            }),
            other => Err(self.unexpected("ChunkResponse", &other)),
        }
    }

    fn unexpected(&self, expected: &'static str, got: &Message) -> DownloadError {
        DownloadError::UnexpectedResponse {
            addr: self.addr.clone(),
            expected,
            got: got.type_name().to_string(),
        }
    }
}

/// Fetch the catalog over a fresh, short-lived connection.
pub async fn fetch_catalog(addr: &str, timeout: Option<Duration>) -> Result<Catalog, DownloadError> {
    PeerConnection::connect(addr, timeout).await?.catalog().await
}

async fn bounded<T>(
    addr: &str,
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T, DownloadError>>,
) -> Result<T, DownloadError> {
    match timeout {
        None => fut.await,
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| DownloadError::Timeout {
                addr: addr.to_string(),
                timeout: t,
            })?,
    }
}
