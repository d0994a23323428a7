//! # Grid Centralized Configuration
//!
//! This crate provides centralized configuration management and default
//! values for every grid component, so that transport, conversation,
//! deployment and node settings are defined in one place.
//!
//! ## Features
//!
//! - **Defaults**: buffer sizes, idle timeouts, queue bounds, TTLs
//! - **Settings**: serde structs for each component, all with `Default`
//! - **Loading**: TOML file plus `GRID__*` environment overrides
//!
//! ## Usage
//!
//! ```rust
//! use grid_config::{service, GridConfig};
//!
//! let config = GridConfig::default();
//! assert_eq!(config.transport.read_buffer_size, service::transport::READ_BUFFER_SIZE);
//! assert_eq!(config.deployment.max_queue_size, service::deployment::MAX_QUEUE_SIZE);
//! ```

pub mod service;
pub mod service_config;

// Re-export commonly used types
pub use service_config::{
    load_config, ConversationSettings, DeploymentSettings, GridConfig, NodeDataSettings,
    NodeSettings, SelectionPolicy, SelectionSettings, TransportSettings,
};
