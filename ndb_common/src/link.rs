//! Per-link configuration.
//!
//! A [`TransporterConfig`] is created once per peer, validated, and never
//! mutated afterwards.
//!
//! # TOML Example
//!
//! ```toml
//! [[links]]
//! local_node = 1
//! remote_node = 2
//! capacity = 1048576
//! medium = { type = "shared_memory", key = 4242 }
//! features = { checksum = true, signal_id = true }
//! ```

use crate::config::ConfigError;
use crate::consts::{
    DEFAULT_CHANNEL_CAPACITY, MAX_CHANNEL_CAPACITY, MAX_MESSAGE_SIZE, MIN_CHANNEL_CAPACITY,
    RING_HEADER_SIZE,
};
use crate::ids::NodeId;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

bitflags! {
    /// Optional per-link envelope features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LinkFeatures: u8 {
        /// XOR checksum trailer on every envelope.
        const CHECKSUM    = 0x01;
        /// Compression flag in the envelope header.
        const COMPRESSION = 0x02;
        /// Per-link sequence number carried in the signal-id word.
        const SIGNAL_ID   = 0x04;
    }
}

/// Feature switches as they appear in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Append a checksum trailer.
    #[serde(default)]
    pub checksum: bool,
    /// Mark envelopes as compressed.
    #[serde(default)]
    pub compression: bool,
    /// Tag envelopes with a sequence number.
    #[serde(default)]
    pub signal_id: bool,
}

impl FeatureConfig {
    /// Convert to the bitflag representation used on the hot path.
    pub fn flags(&self) -> LinkFeatures {
        let mut flags = LinkFeatures::empty();
        flags.set(LinkFeatures::CHECKSUM, self.checksum);
        flags.set(LinkFeatures::COMPRESSION, self.compression);
        flags.set(LinkFeatures::SIGNAL_ID, self.signal_id);
        flags
    }
}

impl From<LinkFeatures> for FeatureConfig {
    fn from(flags: LinkFeatures) -> Self {
        Self {
            checksum: flags.contains(LinkFeatures::CHECKSUM),
            compression: flags.contains(LinkFeatures::COMPRESSION),
            signal_id: flags.contains(LinkFeatures::SIGNAL_ID),
        }
    }
}

/// Medium selection for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediumConfig {
    /// Byte stream. The lower node id listens on `address`, the other dials it.
    Socket {
        /// Listen / dial address.
        address: SocketAddr,
    },
    /// System V shared memory segment identified by `key`.
    SharedMemory {
        /// IPC key shared by both peers.
        key: i32,
    },
}

/// Which end of the link this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// Lower node id: creates the segment / listens.
    Creator,
    /// Higher node id: opens the segment / dials.
    Attacher,
}

/// Immutable descriptor of one point-to-point link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransporterConfig {
    /// This node.
    pub local_node: NodeId,
    /// Peer node.
    pub remote_node: NodeId,
    /// Medium realizing the link.
    pub medium: MediumConfig,
    /// Per-direction channel capacity in bytes (slack excluded).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Envelope features.
    #[serde(default)]
    pub features: FeatureConfig,
    /// How long the send channel may stay full, counted from the first
    /// `Full`, before the pending signal is declared lost.
    #[serde(default = "default_send_full_timeout_ms")]
    pub send_full_timeout_ms: u64,
}

fn default_capacity() -> u32 {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_send_full_timeout_ms() -> u64 {
    1000
}

impl TransporterConfig {
    /// Shared-memory link with default capacity and no features.
    pub fn shared_memory(local: NodeId, remote: NodeId, key: i32) -> Self {
        Self {
            local_node: local,
            remote_node: remote,
            medium: MediumConfig::SharedMemory { key },
            capacity: DEFAULT_CHANNEL_CAPACITY,
            features: FeatureConfig::default(),
            send_full_timeout_ms: default_send_full_timeout_ms(),
        }
    }

    /// Socket link with default capacity and no features.
    pub fn socket(local: NodeId, remote: NodeId, address: SocketAddr) -> Self {
        Self {
            local_node: local,
            remote_node: remote,
            medium: MediumConfig::Socket { address },
            capacity: DEFAULT_CHANNEL_CAPACITY,
            features: FeatureConfig::default(),
            send_full_timeout_ms: default_send_full_timeout_ms(),
        }
    }

    /// Builder-style capacity override.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder-style feature override.
    pub fn with_features(mut self, features: LinkFeatures) -> Self {
        self.features = features.into();
        self
    }

    /// Role assignment: the lower node id is the creator.
    pub fn role(&self) -> LinkRole {
        if self.local_node < self.remote_node {
            LinkRole::Creator
        } else {
            LinkRole::Attacher
        }
    }

    /// Envelope features as bitflags.
    pub fn feature_flags(&self) -> LinkFeatures {
        self.features.flags()
    }

    /// Slack reserved behind each channel payload region.
    pub const fn slack(&self) -> u32 {
        MAX_MESSAGE_SIZE as u32
    }

    /// Bytes of one ring region: header, payload, slack.
    pub fn region_size(&self) -> usize {
        RING_HEADER_SIZE + self.capacity as usize + self.slack() as usize
    }

    /// Bytes of a shared segment holding both directions.
    pub fn segment_size(&self) -> usize {
        2 * self.region_size()
    }

    /// Time a send channel may stay full before a signal is lost.
    pub fn send_full_timeout(&self) -> Duration {
        Duration::from_millis(self.send_full_timeout_ms)
    }

    /// Validate the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - local and remote node are the same
    /// - `capacity` is outside the accepted range or not word aligned
    /// - `send_full_timeout_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_node == self.remote_node {
            return Err(ConfigError::ValidationError(format!(
                "link from {} to itself",
                self.local_node
            )));
        }
        if !(MIN_CHANNEL_CAPACITY..=MAX_CHANNEL_CAPACITY).contains(&self.capacity) {
            return Err(ConfigError::ValidationError(format!(
                "capacity {} outside {}..={}",
                self.capacity, MIN_CHANNEL_CAPACITY, MAX_CHANNEL_CAPACITY
            )));
        }
        if self.capacity % 4 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "capacity {} is not a multiple of 4",
                self.capacity
            )));
        }
        if self.send_full_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "send_full_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing of the connection setup poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPolicy {
    /// Wait between two setup steps.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total time allowed before setup escalates to a disconnect.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ConnectPolicy {
    /// Policy from durations.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval_ms: interval.as_millis() as u64,
            connect_timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Setup timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
