//! meshfile wire format: the typed request/response envelope.
//!
//! One message per line: a compact JSON object `{"type": ..., "payload": ...}`
//! followed by a single `\n`. The payload shape is fixed by the type tag.
//! Binary chunk data travels as standard base64, so a serialized message
//! never contains the terminator byte.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Message terminator on the stream.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Longest accepted line, terminator included. A full 1 MiB chunk encodes
/// to roughly 1.4 MiB of base64, so this leaves ample headroom.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

// ── Messages ──────────────────────────────────────────────────────────────────

/// Every message exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    /// client → server. Ask for the full catalog.
    CatalogRequest,

    /// server → client.
    CatalogResponse(Catalog),

    /// client → server. Ask for one file's chunk list by name.
    FileMetadataRequest { file_name: String },

    /// server → client. `chunks` is empty when the name is unknown.
    FileMetadataResponse {
        file_name: String,
        chunks: Vec<String>,
    },

    /// client → server. `file_hash` names the chunk namespace explicitly.
    ChunkRequest { file_hash: String, chunk_id: String },

    /// server → client. `hash` is the hex SHA-256 of `data`.
    ChunkResponse {
        chunk_id: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
        hash: String,
    },
}

impl Message {
    /// The type tag as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::CatalogRequest => "CatalogRequest",
            Message::CatalogResponse(_) => "CatalogResponse",
            Message::FileMetadataRequest { .. } => "FileMetadataRequest",
            Message::FileMetadataResponse { .. } => "FileMetadataResponse",
            Message::ChunkRequest { .. } => "ChunkRequest",
            Message::ChunkResponse { .. } => "ChunkResponse",
        }
    }

    /// True for the server → client half of the protocol.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::CatalogResponse(_)
                | Message::FileMetadataResponse { .. }
                | Message::ChunkResponse { .. }
        )
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Serialize a message, without the terminator.
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(msg).map_err(WireError::Unencodable)?;
    // Compact JSON escapes control characters inside strings, so this only
    // fires if the serializer itself changes behaviour.
    if bytes.contains(&FRAME_TERMINATOR) {
        return Err(WireError::TerminatorInPayload);
    }
    Ok(bytes)
}

/// Serialize a message and append the terminator.
pub fn encode_line(msg: &Message) -> Result<Vec<u8>, WireError> {
    let mut bytes = encode(msg)?;
    if bytes.len() + 1 > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(bytes.len() + 1));
    }
    bytes.push(FRAME_TERMINATOR);
    Ok(bytes)
}

/// Parse one line. A trailing `\n` or `\r\n` is tolerated.
pub fn decode(line: &[u8]) -> Result<Message, WireError> {
    let line = line.strip_suffix(&[FRAME_TERMINATOR]).unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    serde_json::from_slice(line).map_err(WireError::Malformed)
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("unencodable payload: {0}")]
    Unencodable(serde_json::Error),

    #[error("serialized message contains the frame terminator")]
    TerminatorInPayload,

    #[error("frame of {0} bytes exceeds maximum {}", MAX_FRAME_LEN)]
    FrameTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
