//! # NDB Signal Transporter
//!
//! Point-to-point transport of signals between database nodes. Every pair
//! of nodes shares one bidirectional link realized over System V shared
//! memory or a TCP stream. Links come up without a coordinator, detect
//! peer loss from attach counts and socket errors, deliver in order
//! exactly once, and never block the kernel's execution thread.
//!
//! ## Features
//!
//! - **Lock-Free Channels**: single-writer cursors with acquire/release ordering
//! - **Symmetric Setup**: the lower node id creates/listens, no handshake decides roles
//! - **Backpressure, Not Blocking**: `send` returns `Full` instead of waiting
//! - **Strict Framing**: bad length, checksum or sequence tears the link down
//! - **Page-Backed Buffers**: socket rings are pages from a shared [`ndb_malloc::PageArena`]
//!
//! ## Architecture Overview
//!
//! ```text
//!  execution thread                              watchdog thread
//! ┌────────────────────────┐                   ┌──────────────────────┐
//! │ TransporterRegistry    │                   │ ConnectWatchdog      │
//! │  send / perform_send   │                   │  poll_connect        │
//! │  perform_receive       │                   │  check_connected     │
//! └──────────┬─────────────┘                   └──────────┬───────────┘
//!            │        Arc<Mutex<Transporter>> per peer    │
//!            ▼                                            ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Transporter: LinkState machine, packer, TransportCallback        │
//! └──────────┬─────────────────────────────────────────┬─────────────┘
//!            │ Medium::SharedMemory                    │ Medium::Socket
//!            ▼                                         ▼
//! ┌──────────────────────────────┐      ┌───────────────────────────────┐
//! │ segment: [region 0][region 1]│      │ TcpStream + page-backed rings │
//! │ RingChannel per direction    │      │ hello (magic, node id)        │
//! └──────────────────────────────┘      └───────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ndb_common::prelude::*;
//! use ndb_malloc::PageArena;
//! use ndb_transporter::{
//!     Priority, SendStatus, Signal, SignalHeader, TransportCallback, Transporter,
//! };
//! use std::sync::Arc;
//!
//! struct Kernel;
//!
//! impl TransportCallback for Kernel {
//!     fn deliver(&self, header: &SignalHeader, _: Priority, body: &[u32], _: &[&[u32]]) {
//!         println!("gsn {} with {} words", header.gsn, body.len());
//!     }
//!     fn report_connect(&self, node: NodeId) {
//!         println!("{node} up");
//!     }
//!     fn report_disconnect(&self, node: NodeId, error: TransporterError) {
//!         println!("{node} down: {error}");
//!     }
//!     fn report_error(&self, node: NodeId, error: TransporterError) {
//!         println!("{node}: {error}");
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let arena = PageArena::new(&ArenaConfig::default())?;
//! let config = TransporterConfig::shared_memory(NodeId::new(1), NodeId::new(2), 0x4E44);
//! let mut link = Transporter::new(config, &arena, Arc::new(Kernel))?;
//! link.connect(&ConnectPolicy::default())?;
//!
//! let to = BlockRef::new(NodeId::new(2), 248);
//! let signal = Signal::new(17, BlockRef::new(NodeId::new(1), 248), to).with_body(&[1, 2, 3])?;
//! while link.send(&signal) == SendStatus::Full {
//!     link.poll_receive()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **Transporter**: `Send`; one thread at a time, shared as `Arc<Mutex<_>>`
//! - **RingChannel**: one producer view and one consumer view per region
//! - **TransportCallback**: `Send + Sync`; called from the execution and watchdog threads

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod error;
pub mod medium;
pub mod packer;
pub mod registry;
pub mod ring;
pub mod signal;
pub mod state;
pub mod transporter;
pub mod watchdog;

pub use callback::TransportCallback;
pub use error::{TransportError, TransportResult};
pub use medium::{LinkMedium, Medium};
pub use registry::TransporterRegistry;
pub use ring::{RingChannel, WriteSlot};
pub use signal::{Priority, Signal, SignalHeader};
pub use state::LinkState;
pub use transporter::{DisconnectHandle, SendStatus, Transporter};
pub use watchdog::{CancelToken, ConnectWatchdog, SharedTransporter};

use ndb_common::config::LogLevel;

/// Initialize tracing for transporter logging.
///
/// `RUST_LOG` wins when it parses; otherwise `level` (usually
/// `SharedConfig::log_level`) sets the filter.
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(log_filter(level, env.as_deref()))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn log_filter(level: LogLevel, env: Option<&str>) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    env.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_filter()))
}
