//! Configuration system for meshfile.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHFILE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshfile/config.toml
//!   3. ~/.config/meshfile/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the download worker pool.
pub const MAX_WORKERS: usize = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshfileConfig {
    pub node: NodeConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// TCP address the node listens on.
    pub listen_addr: String,
    /// Directory whose regular files are shared. Not recursive.
    pub shared_dir: PathBuf,
    /// Where shared files are split into hash-named chunk namespaces.
    pub chunk_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Where reconstructed files are written.
    pub download_dir: PathBuf,
    /// Where downloaded chunks are stored before reconstruction.
    pub chunk_dir: PathBuf,
    /// Concurrent fetch workers per download.
    pub workers: usize,
    /// Per-request read/write bound in seconds. 0 = wait forever.
    pub request_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7070".to_string(),
            shared_dir: data_dir().join("shared"),
            chunk_dir: data_dir().join("chunks"),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: data_dir().join("downloads"),
            chunk_dir: data_dir().join("download-chunks"),
            workers: 4,
            request_timeout_secs: 0,
        }
    }
}

impl DownloadConfig {
    /// Worker count clamped to 1..=MAX_WORKERS.
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshfile")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("meshfile")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshfileConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            MeshfileConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHFILE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshfileConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHFILE_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESHFILE_NODE__LISTEN_ADDR") {
            self.node.listen_addr = v;
        }
        if let Some(v) = lookup("MESHFILE_NODE__SHARED_DIR") {
            self.node.shared_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MESHFILE_NODE__CHUNK_DIR") {
            self.node.chunk_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MESHFILE_DOWNLOAD__DIR") {
            self.download.download_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MESHFILE_DOWNLOAD__CHUNK_DIR") {
            self.download.chunk_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MESHFILE_DOWNLOAD__WORKERS") {
            if let Ok(n) = v.parse() {
                self.download.workers = n;
            }
        }
        if let Some(v) = lookup("MESHFILE_DOWNLOAD__REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.download.request_timeout_secs = n;
            }
        }
    }
}
