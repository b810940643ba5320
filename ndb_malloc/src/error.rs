//! Error types for page allocation

use ndb_common::config::ConfigError;
use thiserror::Error;

/// Errors returned by the allocator and the arena
#[derive(Error, Debug)]
pub enum AllocError {
    /// No free run of the required class or larger
    #[error("Arena exhausted: {requested} pages requested, {free} free")]
    Exhausted {
        /// Pages requested
        requested: u32,
        /// Pages free at the time of the request
        free: u32,
    },

    /// Request above the largest buddy run
    #[error("Request of {requested} pages exceeds the largest run of {max}")]
    TooLarge {
        /// Pages requested
        requested: u32,
        /// Largest grantable run
        max: u32,
    },

    /// Zero-page request
    #[error("Zero pages requested")]
    ZeroPages,

    /// Growth beyond the reserved address space
    #[error("Arena limit reached: {requested} pages requested, limit {max}")]
    ArenaLimit {
        /// Total pages after the requested growth
        requested: u64,
        /// Reserved maximum
        max: u32,
    },

    /// Release of a run that was not granted by this allocator
    #[error("Invalid release of {count} pages at {start}")]
    InvalidRelease {
        /// First page of the run
        start: u32,
        /// Pages in the run
        count: u32,
    },

    /// Boundary bitmap group that cannot hold the largest run
    #[error("Group of {group_pages} pages is not a power of two of at least {min}")]
    InvalidGroupSize {
        /// Requested pages per group
        group_pages: u32,
        /// Largest buddy run
        min: u32,
    },

    /// Invalid arena configuration
    #[error("Arena configuration: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },

    /// Mapping the arena failed
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

/// Result type for allocator operations
pub type AllocResult<T> = Result<T, AllocError>;
