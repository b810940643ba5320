//! Prelude module for common re-exports.
//!
//! ```rust
//! use ndb_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ArenaConfig, ConfigError, ConfigLoader, LogLevel, NodeTransportConfig, SharedConfig,
};
pub use crate::link::{
    ConnectPolicy, FeatureConfig, LinkFeatures, LinkRole, MediumConfig, TransporterConfig,
};

// ─── Identifiers ────────────────────────────────────────────────────
pub use crate::ids::{BlockRef, NodeId};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ErrorClass, TransporterError};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{MAX_MESSAGE_SIZE, MAX_SECTIONS, MAX_SIGNAL_BODY_WORDS};
