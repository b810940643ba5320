//! Error types for transporter operations

use ndb_common::config::ConfigError;
use ndb_common::error::TransporterError;
use ndb_common::ids::NodeId;
use ndb_malloc::AllocError;
use thiserror::Error;

/// Errors returned by transporter, registry and media operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// Link-level failure with its wire code
    #[error("Link to {node}: {kind} ({:#06x})", .kind.code())]
    Link {
        /// Peer of the failed link
        node: NodeId,
        /// Error kind
        kind: TransporterError,
    },

    /// Operation not valid in the current link state
    #[error("Link to {node} is {state}, expected {expected}")]
    InvalidState {
        /// Peer of the link
        node: NodeId,
        /// Current state
        state: &'static str,
        /// State required by the operation
        expected: &'static str,
    },

    /// Backing memory cannot hold a ring region
    #[error("Ring region needs {needed} bytes, buffer has {available}")]
    RegionTooSmall {
        /// Header, payload and slack bytes
        needed: usize,
        /// Bytes supplied
        available: usize,
    },

    /// Ring capacity not a word multiple larger than its slack
    #[error("Ring capacity {capacity} does not fit slack {slack}")]
    InvalidGeometry {
        /// Payload bytes
        capacity: u32,
        /// Slack bytes
        slack: u32,
    },

    /// No transporter registered for the node
    #[error("No link registered for {node}")]
    NotRegistered {
        /// Requested peer
        node: NodeId,
    },

    /// A transporter for the node is already registered
    #[error("Link for {node} already registered")]
    AlreadyRegistered {
        /// Duplicate peer
        node: NodeId,
    },

    /// Page allocation for a socket ring failed
    #[error("Buffer allocation failed: {source}")]
    Alloc {
        /// Source allocator error
        #[from]
        source: AllocError,
    },

    /// Invalid link configuration
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl TransportError {
    /// Link error constructor.
    pub fn link(node: NodeId, kind: TransporterError) -> Self {
        Self::Link { node, kind }
    }

    /// Wire-level kind, if this is a link error.
    pub fn kind(&self) -> Option<TransporterError> {
        match self {
            Self::Link { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type for transporter operations
pub type TransportResult<T> = Result<T, TransportError>;
