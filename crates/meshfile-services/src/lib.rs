//! meshfile-services: the async half of a meshfile node.
//!
//! Server side: `NodeServer` accepts connections and runs one
//! `ConnectionDispatcher` loop per peer. Client side: `PeerConnection`
//! speaks the same protocol, and `Downloader` fans chunk fetches out
//! across several nodes.

pub mod catalog;
pub mod chunk_store;
pub mod client;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod framing;
pub mod observer;
pub mod server;

pub use catalog::build_catalog;
pub use chunk_store::{ChunkStore, Manifest};
pub use client::{fetch_catalog, PeerConnection};
pub use dispatch::{ConnectionDispatcher, NodeContext};
pub use download::{assign_round_robin, Downloader};
pub use error::DownloadError;
pub use framing::{write_message, FrameReader};
pub use observer::{NodeEvent, NodeObserver, RecordingObserver, TracingObserver};
pub use server::NodeServer;
