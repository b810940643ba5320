//! # NDB Page Allocator
//!
//! Buddy-style allocator handing out runs of fixed-size pages. The kernel
//! and the transporter's socket rings allocate and free page runs at high
//! frequency; pages already granted are never relocated.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────────────────┐
//! │ PageArena            │      │ PageAllocator (bookkeeping)      │
//! │                      │      │                                  │
//! │ anon mapping, fixed  ├─────►│ 16 size-classed free lists       │
//! │ Mutex<PageAllocator> │      │ BoundaryMap (first/last planes)  │
//! └─────────┬────────────┘      └──────────────────────────────────┘
//!           │ alloc()
//!           ▼
//! ┌──────────────────────┐
//! │ PageBuffer (RAII)    │  releases its run on drop
//! └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use ndb_common::config::ArenaConfig;
//! use ndb_malloc::PageArena;
//!
//! # fn main() -> Result<(), ndb_malloc::AllocError> {
//! let arena = PageArena::new(&ArenaConfig::with_pages(4096, 16, 64))?;
//! let buffer = arena.alloc(3)?;
//! assert_eq!(buffer.run().count, 4);
//! drop(buffer);
//! assert_eq!(arena.stats().used, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **PageAllocator**: not synchronized, single owner
//! - **PageArena**: one mutex domain around the allocator
//! - **PageBuffer**: `Send`, exclusively owns its pages

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod boundary;
pub mod buddy;
pub mod error;
pub mod page;

pub use arena::{ArenaStats, PageArena, PageBuffer};
pub use buddy::PageAllocator;
pub use error::{AllocError, AllocResult};
pub use page::{PageIndex, PageRun};
