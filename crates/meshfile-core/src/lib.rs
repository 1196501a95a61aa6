//! meshfile-core: wire format, catalog model, hashing, and configuration.
//! All other meshfile crates depend on this one.

pub mod catalog;
pub mod config;
pub mod crypto;
pub mod wire;

pub use catalog::{Catalog, FileEntry};
pub use wire::{Message, WireError};
