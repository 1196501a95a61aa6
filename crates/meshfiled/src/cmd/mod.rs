//! CLI command modules.

pub mod catalog;
pub mod download;
pub mod metadata;
pub mod serve;
