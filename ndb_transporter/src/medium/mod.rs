//! Link media: shared memory and byte-stream sockets
//!
//! The medium set is closed, so [`Medium`] is an enum dispatching to the
//! two implementations through [`LinkMedium`]. Every operation is a single
//! non-blocking step; the transporter drives them from its state machine.

mod shm;
mod socket;

pub use shm::ShmLink;
pub use socket::SocketLink;

use crate::ring::RingChannel;
use ndb_common::error::TransporterError;
use ndb_common::link::{MediumConfig, TransporterConfig};
use ndb_malloc::PageArena;
use std::sync::Arc;

/// Result of one medium step, carrying a wire-level error kind.
pub type MediumResult<T> = Result<T, TransporterError>;

/// Operations the transporter needs from a link medium.
pub trait LinkMedium {
    /// Create/open the segment, or listen/dial. `Ok(false)` means retry later.
    fn acquire(&mut self) -> MediumResult<bool>;

    /// Number of parties attached to the medium, this side included.
    fn peer_count(&self) -> MediumResult<u32>;

    /// Initialize the channel this side produces into and flag it ready.
    /// Called once per connection, after both parties are attached.
    fn setup_buffers(&mut self) -> MediumResult<()>;

    /// Whether the peer has flagged its side ready. `Ok(false)` means retry.
    fn peer_ready(&mut self) -> MediumResult<bool>;

    /// `(send, receive)` channels once buffers are set up.
    fn channels(&mut self) -> Option<(&mut RingChannel, &mut RingChannel)>;

    /// Push queued send bytes to the wire; returns bytes written.
    fn flush(&mut self) -> MediumResult<usize>;

    /// Pull wire bytes into the receive channel; returns bytes read.
    fn fill(&mut self) -> MediumResult<usize>;

    /// Peer presence check on an established link.
    fn check_alive(&self) -> MediumResult<()>;

    /// Release OS resources. Always completes locally; a returned error is
    /// a warning about cleanup that failed.
    fn release(&mut self) -> MediumResult<()>;
}

/// The medium realizing one link.
pub enum Medium {
    /// TCP stream with page-backed rings.
    Socket(SocketLink),
    /// System V shared memory segment holding both rings.
    SharedMemory(ShmLink),
}

impl Medium {
    /// Medium described by `config`; socket rings draw pages from `arena`.
    pub fn from_config(config: &TransporterConfig, arena: &Arc<PageArena>) -> Self {
        match config.medium {
            MediumConfig::Socket { address } => {
                Self::Socket(SocketLink::new(config, address, Arc::clone(arena)))
            }
            MediumConfig::SharedMemory { key } => Self::SharedMemory(ShmLink::new(config, key)),
        }
    }

    /// Short medium name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Socket(_) => "tcp",
            Self::SharedMemory(_) => "shm",
        }
    }

    fn inner(&mut self) -> &mut dyn LinkMedium {
        match self {
            Self::Socket(link) => link,
            Self::SharedMemory(link) => link,
        }
    }

    fn inner_ref(&self) -> &dyn LinkMedium {
        match self {
            Self::Socket(link) => link,
            Self::SharedMemory(link) => link,
        }
    }
}

impl LinkMedium for Medium {
    fn acquire(&mut self) -> MediumResult<bool> {
        self.inner().acquire()
    }

    fn peer_count(&self) -> MediumResult<u32> {
        self.inner_ref().peer_count()
    }

    fn setup_buffers(&mut self) -> MediumResult<()> {
        self.inner().setup_buffers()
    }

    fn peer_ready(&mut self) -> MediumResult<bool> {
        self.inner().peer_ready()
    }

    fn channels(&mut self) -> Option<(&mut RingChannel, &mut RingChannel)> {
        self.inner().channels()
    }

    fn flush(&mut self) -> MediumResult<usize> {
        self.inner().flush()
    }

    fn fill(&mut self) -> MediumResult<usize> {
        self.inner().fill()
    }

    fn check_alive(&self) -> MediumResult<()> {
        self.inner_ref().check_alive()
    }

    fn release(&mut self) -> MediumResult<()> {
        self.inner().release()
    }
}
