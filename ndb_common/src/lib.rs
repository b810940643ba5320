//! NDB Common Library
//!
//! This crate provides the identifiers, constants, error taxonomy and
//! configuration loading shared by the page allocator and the transporter
//! crates.
//!
//! # Module Structure
//!
//! - [`ids`] - Node identifiers and block references
//! - [`consts`] - Wire and arena sizing constants
//! - [`error`] - The closed [`error::TransporterError`] taxonomy
//! - [`link`] - Per-link configuration (`TransporterConfig`)
//! - [`config`] - Configuration loading traits and node-level config
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use ndb_common::prelude::*;
//!
//! let local = NodeId::new(1);
//! let remote = NodeId::new(2);
//! assert!(local < remote);
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod ids;
pub mod link;
pub mod prelude;
