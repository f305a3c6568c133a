//! Configuration types for Nimbus
//!
//! This module defines configuration structures used across components.
//! Every section has serde defaults so a partial TOML file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for Nimbus
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is a configuration error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for content blobs
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,
    /// Root directory for namespace indexes
    #[serde(default = "default_metadata_root")]
    pub metadata_root: PathBuf,
    /// Maximum number of namespace indexes held open at once
    #[serde(default = "default_max_open_indexes")]
    pub max_open_indexes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_root: default_content_root(),
            metadata_root: default_metadata_root(),
            max_open_indexes: default_max_open_indexes(),
        }
    }
}

/// Network configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address of the segment writer
    #[serde(default = "default_writer_listen")]
    pub writer_listen: String,
    /// Listen address of the metadata store server
    #[serde(default = "default_meta_listen")]
    pub meta_listen: String,
    /// Metrics and health endpoint of the segment writer
    #[serde(default = "default_writer_metrics_listen")]
    pub writer_metrics_listen: String,
    /// Metrics and health endpoint of the metadata store
    #[serde(default = "default_meta_metrics_listen")]
    pub meta_metrics_listen: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            writer_listen: default_writer_listen(),
            meta_listen: default_meta_listen(),
            writer_metrics_listen: default_writer_metrics_listen(),
            meta_metrics_listen: default_meta_metrics_listen(),
        }
    }
}

/// Cluster configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Metadata store server endpoints, one per replica
    #[serde(default)]
    pub meta_endpoints: Vec<String>,
    /// Minimum number of concurring replies for quorum reads
    #[serde(default = "default_agreement_level")]
    pub agreement_level: usize,
    /// Quorum read timeout (milliseconds)
    #[serde(default = "default_quorum_timeout_ms")]
    pub quorum_timeout_ms: u64,
}

impl ClusterConfig {
    #[must_use]
    pub const fn quorum_timeout(&self) -> Duration {
        Duration::from_millis(self.quorum_timeout_ms)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            meta_endpoints: Vec::new(),
            agreement_level: default_agreement_level(),
            quorum_timeout_ms: default_quorum_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_node_name() -> String {
    "nimbus-node".to_string()
}

fn default_content_root() -> PathBuf {
    PathBuf::from("/var/lib/nimbus/content")
}

fn default_metadata_root() -> PathBuf {
    PathBuf::from("/var/lib/nimbus/metadata")
}

const fn default_max_open_indexes() -> usize {
    10
}

fn default_writer_listen() -> String {
    "0.0.0.0:9300".to_string()
}

fn default_meta_listen() -> String {
    "0.0.0.0:9400".to_string()
}

fn default_writer_metrics_listen() -> String {
    "0.0.0.0:9501".to_string()
}

fn default_meta_metrics_listen() -> String {
    "0.0.0.0:9500".to_string()
}

const fn default_agreement_level() -> usize {
    2
}

const fn default_quorum_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}
