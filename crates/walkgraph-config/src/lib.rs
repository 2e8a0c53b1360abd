//! walkgraph Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.walkgraph/config.toml`
//! - Local config: `.walkgraph/config.toml` (in workspace)
//! - Host overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for walkgraph.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WalkgraphConfig {
    /// Anchor store configuration
    pub storage: StorageConfig,

    /// Access control defaults for execution contexts
    pub access: AccessConfig,

    /// Graph export defaults
    pub export: ExportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl WalkgraphConfig {
    /// Check the merged configuration for values the engine cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.cache_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "storage.cache_capacity",
                "must be greater than zero",
            ));
        }
        if self.export.depth < -1 {
            return Err(ConfigError::invalid_value(
                "export.depth",
                "must be -1 (unlimited) or a non-negative depth",
            ));
        }
        Ok(())
    }

    /// Apply host overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref path) = overrides.store_path {
            self.storage.path = path.clone();
        }

        if let Some(ref identity) = overrides.identity {
            self.access.identity = Some(identity.clone());
        }

        if let Some(elevated) = overrides.elevated {
            self.access.elevated = elevated;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }
}

/// Anchor store configuration.
///
/// # Example TOML
///
/// ```toml
/// [storage]
/// path = ".walkgraph/graph.db"
/// cache_capacity = 1024
/// busy_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file holding persisted anchors
    pub path: PathBuf,

    /// Number of decoded records kept in the read cache
    pub cache_capacity: usize,

    /// How long a writer waits on a locked database before failing (milliseconds)
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".walkgraph/graph.db"),
            cache_capacity: 1024,
            busy_timeout_ms: 5000,
        }
    }
}

/// Visibility level assigned to anchors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevelSetting {
    /// Visible only to the owning run
    #[default]
    Private,
    /// Visible to every caller
    Public,
    /// Visible to identified callers
    Protected,
}

/// Access control defaults applied to new execution contexts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccessConfig {
    /// Level stamped on newly created anchors
    pub default_level: AccessLevelSetting,

    /// Caller identity; `None` means anonymous
    pub identity: Option<String>,

    /// Whether contexts run with owner (elevated) access
    pub elevated: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_level: AccessLevelSetting::default(),
            identity: None,
            elevated: true,
        }
    }
}

/// Graph export defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportConfig {
    /// Maximum traversal depth (-1 for unlimited)
    pub depth: i64,

    /// Maximum number of nodes emitted
    pub node_limit: usize,

    /// Maximum number of edges emitted
    pub edge_limit: usize,

    /// Breadth-first traversal instead of depth-first
    pub bfs: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            depth: -1,
            node_limit: 512,
            edge_limit: 512,
            bfs: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// Host overrides for configuration values.
///
/// Applied over file-based config by the embedding program.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override the store database path
    pub store_path: Option<PathBuf>,

    /// Override the caller identity
    pub identity: Option<String>,

    /// Override elevated access
    pub elevated: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,
}
