//! Grid Configuration Module
//!
//! Provides configuration loading and management for grid nodes.
//! Supports loading from TOML files with environment variable overrides.

use crate::service;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

/// Main grid configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct GridConfig {
    /// Standalone node settings
    pub node: NodeSettings,

    /// Socket transport settings
    pub transport: TransportSettings,

    /// Conversation (request/reply) settings
    pub conversation: ConversationSettings,

    /// Deployment job executor settings
    pub deployment: DeploymentSettings,

    /// Node context store settings
    pub node_data: NodeDataSettings,

    /// Resource selection settings
    pub selection: SelectionSettings,
}

/// Node runner settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct NodeSettings {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub status_interval_secs: u64,
    pub eviction_interval_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: service::node::NAME.to_string(),
            address: service::node::ADDRESS.to_string(),
            port: service::node::PORT,
            status_interval_secs: service::node::STATUS_INTERVAL_SECS,
            eviction_interval_secs: service::node::EVICTION_INTERVAL_SECS,
        }
    }
}

impl NodeSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// Socket transport settings shared by connectors and acceptors
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TransportSettings {
    pub read_buffer_size: usize,
    pub idle_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: service::transport::READ_BUFFER_SIZE,
            idle_timeout_secs: service::transport::IDLE_TIMEOUT_SECS,
            connect_timeout_ms: service::transport::CONNECT_TIMEOUT_MS,
            max_frame_size: service::transport::MAX_FRAME_SIZE,
        }
    }
}

impl TransportSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Conversation settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConversationSettings {
    /// Upper bound on a blocking round trip
    pub request_timeout_ms: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: service::conversation::REQUEST_TIMEOUT_MS,
        }
    }
}

impl ConversationSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Deployment job executor settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DeploymentSettings {
    pub max_queue_size: usize,
    pub async_enabled: bool,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            max_queue_size: service::deployment::MAX_QUEUE_SIZE,
            async_enabled: service::deployment::ASYNC_ENABLED,
        }
    }
}

impl DeploymentSettings {
    /// Apply the `GRID_DEPLOYMENT_JOB_QUEUE_SIZE` override, if set
    pub fn apply_env_override(&mut self) {
        let raw = std::env::var(service::deployment::JOB_QUEUE_SIZE_ENV).ok();
        self.max_queue_size = resolve_queue_size(raw.as_deref(), self.max_queue_size);
    }
}

/// Parse a queue size override, keeping `fallback` when it is unusable
pub fn resolve_queue_size(raw: Option<&str>, fallback: usize) -> usize {
    match raw {
        None => fallback,
        Some(value) => match value.trim().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                error!(
                    "Unable to format {} value: '{}', using {} for job cache size",
                    service::deployment::JOB_QUEUE_SIZE_ENV,
                    value,
                    fallback
                );
                fallback
            }
        },
    }
}

/// Node context store settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct NodeDataSettings {
    pub temp_ttl_secs: u64,
}

impl Default for NodeDataSettings {
    fn default() -> Self {
        Self {
            temp_ttl_secs: service::node_data::TEMP_TTL_SECS,
        }
    }
}

impl NodeDataSettings {
    pub fn temp_ttl(&self) -> Duration {
        Duration::from_secs(self.temp_ttl_secs)
    }
}

/// Resource selection policy
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Prefer LOCAL over DISTRIBUTED over REMOTE connectors
    #[default]
    Priority,
    /// Uniformly random candidate
    Random,
    /// Candidate with the lowest measured round trip
    LowestLatency,
}

/// Resource selection settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SelectionSettings {
    pub policy: SelectionPolicy,
}

impl GridConfig {
    /// Load configuration from an optional TOML file with `GRID__` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading grid config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // e.g. GRID__TRANSPORT__IDLE_TIMEOUT_SECS=30
        builder = builder.add_source(
            Environment::with_prefix("GRID")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut grid: GridConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        grid.deployment.apply_env_override();
        grid.expand_env_vars()?;

        debug!(?grid, "Grid configuration loaded");
        Ok(grid)
    }

    /// Parse configuration directly from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Expand environment variables in the node address
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let expanded =
            shellexpand::env(&self.node.address).context("Failed to expand node address")?;
        self.node.address = expanded.to_string();
        Ok(())
    }
}

/// Convenience function to load configuration from an optional file
pub fn load_config(path: Option<&Path>) -> Result<GridConfig> {
    GridConfig::load(path)
}
