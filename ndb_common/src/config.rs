//! Configuration loading traits and node-level configuration.
//!
//! Configuration is retrieved once at startup from a TOML file and handed
//! to the page arena and to each transporter; nothing here is mutated at
//! runtime.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ndb_common::config::{ConfigError, NodeTransportConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = NodeTransportConfig::load_validated(Path::new("node.toml"))?;
//!     println!("{} links for {}", config.links.len(), config.node_id);
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_GROUP_PAGES, DEFAULT_PAGE_SIZE, MAX_RUN_PAGES, MIN_PAGE_SIZE};
use crate::ids::NodeId;
use crate::link::{ConnectPolicy, MediumConfig, TransporterConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields shared by every node process.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "ndbd-3"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Process instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Page arena sizing. Fixed at arena construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Bytes per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pages covered by one boundary bitmap.
    #[serde(default = "default_group_pages")]
    pub group_pages: u32,
    /// Pages registered at `init`. Socket links draw their two rings from
    /// here; at the default 32 KiB page and 1 MiB channel that is 128 pages
    /// per link, and the arena grows toward `max_pages` when it runs dry.
    #[serde(default = "default_initial_pages")]
    pub initial_pages: u32,
    /// Upper bound for `grow`; address space for this many pages is
    /// reserved up front so granted pages never move.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_group_pages() -> u32 {
    DEFAULT_GROUP_PAGES
}

fn default_initial_pages() -> u32 {
    256
}

fn default_max_pages() -> u32 {
    4096
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            group_pages: default_group_pages(),
            initial_pages: default_initial_pages(),
            max_pages: default_max_pages(),
        }
    }
}

impl ArenaConfig {
    /// Small arena, convenient for tests and tools.
    pub fn with_pages(page_size: usize, initial_pages: u32, max_pages: u32) -> Self {
        Self {
            page_size,
            group_pages: DEFAULT_GROUP_PAGES,
            initial_pages,
            max_pages,
        }
    }

    /// Validate sizing.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `page_size` is not a power of two of at least 4096 bytes
    /// - `group_pages` is not a power of two covering the largest buddy run
    /// - `initial_pages` exceeds `max_pages`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() || self.page_size < MIN_PAGE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "page_size {} must be a power of two >= {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if !self.group_pages.is_power_of_two() || self.group_pages < MAX_RUN_PAGES {
            return Err(ConfigError::ValidationError(format!(
                "group_pages {} must be a power of two >= {}",
                self.group_pages, MAX_RUN_PAGES
            )));
        }
        if self.initial_pages > self.max_pages || self.max_pages == 0 {
            return Err(ConfigError::ValidationError(format!(
                "initial_pages {} must not exceed max_pages {}",
                self.initial_pages, self.max_pages
            )));
        }
        Ok(())
    }
}

/// Everything one node needs to bring its transport layer up.
///
/// # TOML Example
///
/// ```toml
/// node_id = 1
///
/// [shared]
/// service_name = "ndbd-1"
///
/// [arena]
/// initial_pages = 64
///
/// [connect]
/// poll_interval_ms = 50
///
/// [[links]]
/// local_node = 1
/// remote_node = 2
/// medium = { type = "shared_memory", key = 9001 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTransportConfig {
    /// Common process settings.
    pub shared: SharedConfig,
    /// This node.
    pub node_id: NodeId,
    /// Page arena sizing.
    #[serde(default)]
    pub arena: ArenaConfig,
    /// Setup poll loop timing.
    #[serde(default)]
    pub connect: ConnectPolicy,
    /// One entry per peer.
    #[serde(default)]
    pub links: Vec<TransporterConfig>,
}

impl NodeTransportConfig {
    /// Load and validate in one step.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the node configuration and every link.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if any link is invalid, does not
    /// start at `node_id`, duplicates a peer, or reuses a shared-memory key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.arena.validate()?;
        if self.connect.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        let mut peers = HashSet::new();
        let mut keys = HashSet::new();
        for link in &self.links {
            link.validate()?;
            if link.local_node != self.node_id {
                return Err(ConfigError::ValidationError(format!(
                    "link to {} declares local {} but this is {}",
                    link.remote_node, link.local_node, self.node_id
                )));
            }
            if !peers.insert(link.remote_node) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate link to {}",
                    link.remote_node
                )));
            }
            if let MediumConfig::SharedMemory { key } = link.medium {
                if !keys.insert(key) {
                    return Err(ConfigError::ValidationError(format!(
                        "shared memory key {key} used by more than one link"
                    )));
                }
            }
        }
        Ok(())
    }
}
