//! Single-direction byte channel with producer/consumer cursors
//!
//! ## Region Layout
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬────────────────────┬──────────┐
//! │ write u32│ read u32 │ ready u32│ reserved │ payload (capacity) │  slack   │
//! └──────────┴──────────┴──────────┴──────────┴────────────────────┴──────────┘
//!  0          4          8          12         64                   64+capacity
//! ```
//!
//! ## Lock-Free Protocol
//!
//! - The producer alone stores `write`, the consumer alone stores `read`
//! - Both cursors stay in `[0, capacity)`; `used = (write - read) mod capacity`
//! - A message is laid down contiguously at `write`, running into the slack
//!   if needed; the overflow past `capacity` is mirrored to the payload head
//!   before `write` is published, so the consumer sees a plain circular buffer
//! - `write` is stored with Release after the payload; `read` is stored with
//!   Release after the consumer is done with the bytes. Opposite loads Acquire.
//! - The readiness flag is owned by the producer of the region

use crate::error::{TransportError, TransportResult};
use ndb_common::consts::RING_HEADER_SIZE;
use ndb_malloc::PageBuffer;
use static_assertions::const_assert_eq;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Cursor and flag words at the start of every ring region.
#[repr(C)]
pub struct RingHeader {
    write: AtomicU32,
    read: AtomicU32,
    ready: AtomicU32,
    _reserved: [u8; RING_HEADER_SIZE - 12],
}

const_assert_eq!(core::mem::size_of::<RingHeader>(), RING_HEADER_SIZE);
const_assert_eq!(core::mem::align_of::<RingHeader>(), 4);

/// One direction of a link.
///
/// A `RingChannel` is a view over a region; the producer and the consumer
/// each hold their own view. Each cursor must have exactly one writer.
pub struct RingChannel {
    header: NonNull<RingHeader>,
    data: NonNull<u8>,
    capacity: u32,
    slack: u32,
    _pages: Option<Arc<PageBuffer>>,
}

// SAFETY: the region outlives the view (owned pages or a mapping held by the
// medium); shared words are atomics and payload access follows the cursors.
unsafe impl Send for RingChannel {}

impl RingChannel {
    /// Bytes needed for a region with this capacity and slack.
    pub const fn region_size(capacity: u32, slack: u32) -> usize {
        RING_HEADER_SIZE + capacity as usize + slack as usize
    }

    /// View over arena pages; several views may share one buffer.
    pub fn over_pages(pages: Arc<PageBuffer>, capacity: u32, slack: u32) -> TransportResult<Self> {
        let needed = Self::region_size(capacity, slack);
        if pages.len() < needed {
            return Err(TransportError::RegionTooSmall {
                needed,
                available: pages.len(),
            });
        }
        // SAFETY: the buffer is page aligned, holds `needed` bytes, and is kept
        // alive by the Arc stored in the view.
        let mut ring = unsafe { Self::over_raw(pages.as_mut_ptr(), capacity, slack)? };
        ring._pages = Some(pages);
        Ok(ring)
    }

    /// View over raw memory such as a shared-memory segment.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned, valid for `region_size(capacity, slack)`
    /// bytes, and stay mapped for the lifetime of the view.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` unless `capacity` is a word multiple above `slack`.
    pub unsafe fn over_raw(base: *mut u8, capacity: u32, slack: u32) -> TransportResult<Self> {
        debug_assert_eq!(base as usize % 4, 0);
        if capacity <= slack || capacity % 4 != 0 {
            return Err(TransportError::InvalidGeometry { capacity, slack });
        }
        let Some(header) = NonNull::new(base.cast::<RingHeader>()) else {
            return Err(TransportError::RegionTooSmall {
                needed: Self::region_size(capacity, slack),
                available: 0,
            });
        };
        // SAFETY: caller guarantees the region covers header and payload.
        let data = unsafe { NonNull::new_unchecked(base.add(RING_HEADER_SIZE)) };
        Ok(Self {
            header,
            data,
            capacity,
            slack,
            _pages: None,
        })
    }

    /// Another view of the same region.
    pub fn view(&self) -> Self {
        Self {
            header: self.header,
            data: self.data,
            capacity: self.capacity,
            slack: self.slack,
            _pages: self._pages.clone(),
        }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: see constructors.
        unsafe { self.header.as_ref() }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slack bytes behind the payload.
    pub fn slack(&self) -> u32 {
        self.slack
    }

    /// Producer view of occupied bytes.
    #[inline]
    pub fn used(&self) -> u32 {
        let write = self.header().write.load(Ordering::Relaxed);
        let read = self.header().read.load(Ordering::Acquire);
        (write + self.capacity - read) % self.capacity
    }

    /// Largest message `reserve` accepts right now.
    #[inline]
    pub fn free_space(&self) -> u32 {
        (self.capacity - self.slack - self.used()).min(self.slack)
    }

    /// Reserve `len` contiguous bytes at the write cursor.
    ///
    /// `None` means full; neither cursor is touched. A message is accepted
    /// iff `len <= capacity - slack - used` and `len <= slack`. The second
    /// bound holds even when the ring is empty: a message may run past the
    /// payload end into the slack, and the slack only covers one maximal
    /// message.
    pub fn reserve(&mut self, len: usize) -> Option<WriteSlot<'_>> {
        let len = u32::try_from(len).ok()?;
        if len > self.slack || len > self.capacity - self.slack - self.used() {
            return None;
        }
        let offset = self.header().write.load(Ordering::Relaxed);
        Some(WriteSlot {
            ring: self,
            offset,
            len,
        })
    }

    /// Reserve, copy and publish `bytes`; false when full.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        match self.reserve(bytes.len()) {
            Some(mut slot) => {
                slot.as_mut_slice().copy_from_slice(bytes);
                slot.publish();
                true
            }
            None => false,
        }
    }

    /// Consumer view of bytes ready to read.
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.header().write.load(Ordering::Acquire);
        let read = self.header().read.load(Ordering::Relaxed);
        ((write + self.capacity - read) % self.capacity) as usize
    }

    /// The next `len` unread bytes as at most two slices, without consuming.
    pub fn peek(&self, len: usize) -> Option<(&[u8], &[u8])> {
        if len > self.available() {
            return None;
        }
        let read = self.header().read.load(Ordering::Relaxed) as usize;
        let first = len.min(self.capacity as usize - read);
        // SAFETY: [read, read + len) mod capacity is published and not yet
        // consumed, so the producer does not write it.
        unsafe {
            let head = std::slice::from_raw_parts(self.data.as_ptr().add(read), first);
            let tail = std::slice::from_raw_parts(self.data.as_ptr(), len - first);
            Some((head, tail))
        }
    }

    /// Copy the next `dst.len()` unread bytes without consuming.
    pub fn copy_out(&self, dst: &mut [u8]) -> bool {
        match self.peek(dst.len()) {
            Some((head, tail)) => {
                dst[..head.len()].copy_from_slice(head);
                dst[head.len()..].copy_from_slice(tail);
                true
            }
            None => false,
        }
    }

    /// Release `len` read bytes back to the producer.
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len <= self.available());
        let read = self.header().read.load(Ordering::Relaxed);
        let next = (read as usize + len) % self.capacity as usize;
        self.header().read.store(next as u32, Ordering::Release);
    }

    /// Zero both cursors. Only during buffer setup, before the peer reads.
    pub fn clear(&mut self) {
        self.header().write.store(0, Ordering::Relaxed);
        self.header().read.store(0, Ordering::Release);
    }

    /// Producer's readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.header().ready.store(ready as u32, Ordering::Release);
    }

    /// Whether the producer finished setting up this region.
    pub fn is_ready(&self) -> bool {
        self.header().ready.load(Ordering::Acquire) == 1
    }
}

impl std::fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("RingChannel")
            .field("capacity", &self.capacity)
            .field("slack", &self.slack)
            .field("write", &header.write.load(Ordering::Relaxed))
            .field("read", &header.read.load(Ordering::Relaxed))
            .field("ready", &header.ready.load(Ordering::Relaxed))
            .finish()
    }
}

/// Reserved bytes at the write cursor, committed by [`WriteSlot::publish`].
///
/// Dropping a slot without publishing leaves the channel untouched.
pub struct WriteSlot<'a> {
    ring: &'a mut RingChannel,
    offset: u32,
    len: u32,
}

impl WriteSlot<'_> {
    /// Length of the slot.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable bytes; may extend into the slack.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: offset < capacity and len <= slack, so the slot lies inside
        // payload + slack; the range is free until published.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.ring.data.as_ptr().add(self.offset as usize),
                self.len as usize,
            )
        }
    }

    /// Publish only the first `len` bytes of the slot.
    pub fn publish_prefix(mut self, len: usize) {
        self.len = self.len.min(len as u32);
        self.publish();
    }

    /// Mirror any slack overflow to the head and advance the write cursor.
    pub fn publish(self) {
        let capacity = self.ring.capacity;
        let end = self.offset + self.len;
        if end > capacity {
            let overflow = (end - capacity) as usize;
            // SAFETY: [0, overflow) is free space: used + len <= capacity - slack.
            unsafe {
                let base = self.ring.data.as_ptr();
                std::ptr::copy_nonoverlapping(base.add(capacity as usize), base, overflow);
            }
        }
        self.ring
            .header()
            .write
            .store(end % capacity, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndb_common::config::ArenaConfig;
    use ndb_malloc::PageArena;

    fn ring(capacity: u32, slack: u32) -> (RingChannel, RingChannel) {
        let arena = PageArena::new(&ArenaConfig::with_pages(4096, 64, 64)).unwrap();
        let pages = Arc::new(
            arena
                .alloc_bytes(RingChannel::region_size(capacity, slack))
                .unwrap(),
        );
        let mut producer = RingChannel::over_pages(pages, capacity, slack).unwrap();
        producer.clear();
        let consumer = producer.view();
        (producer, consumer)
    }

    #[test]
    fn test_reserve_publish_consume() {
        let (mut tx, mut rx) = ring(4096, 512);
        assert_eq!(rx.available(), 0);

        assert!(tx.push(b"hello"));
        assert_eq!(rx.available(), 5);

        let mut out = [0u8; 5];
        assert!(rx.copy_out(&mut out));
        assert_eq!(&out, b"hello");
        rx.consume(5);
        assert_eq!(rx.available(), 0);
        assert_eq!(tx.used(), 0);
    }

    #[test]
    fn test_unpublished_slot_is_invisible() {
        let (mut tx, rx) = ring(4096, 512);
        {
            let mut slot = tx.reserve(16).unwrap();
            slot.as_mut_slice().fill(1);
        }
        assert_eq!(rx.available(), 0);
        assert_eq!(tx.used(), 0);
    }

    #[test]
    fn test_full_at_capacity_minus_slack() {
        let (mut tx, _rx) = ring(4096, 512);
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert!(tx.push(&[0u8; 512]));
        assert_eq!(tx.used(), 3584);
        assert!(tx.reserve(1).is_none());
        assert_eq!(tx.used(), 3584);
    }

    #[test]
    fn test_oversized_reserve_rejected() {
        let (mut tx, _rx) = ring(4096, 512);
        // room for 3584 bytes, but not for anything above the slack
        assert_eq!(tx.used(), 0);
        assert!(tx.reserve(513).is_none());
        assert!(tx.reserve(512).is_some());
        assert_eq!(tx.free_space(), 512);
    }

    #[test]
    fn test_geometry_rejected() {
        let arena = PageArena::new(&ArenaConfig::with_pages(4096, 4, 4)).unwrap();
        let pages = Arc::new(arena.alloc(4).unwrap());
        assert!(matches!(
            RingChannel::over_pages(Arc::clone(&pages), 512, 512),
            Err(TransportError::InvalidGeometry { capacity: 512, slack: 512 })
        ));
        assert!(matches!(
            RingChannel::over_pages(pages, 1026, 256),
            Err(TransportError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_wrap_is_mirrored_to_head() {
        let (mut tx, mut rx) = ring(1024, 256);
        // move both cursors to 1000
        for _ in 0..5 {
            assert!(tx.push(&[0u8; 200]));
            rx.consume(200);
        }
        let payload: Vec<u8> = (0..100u8).collect();
        assert!(tx.push(&payload));
        assert_eq!(rx.available(), 100);

        let (head, tail) = rx.peek(100).unwrap();
        assert_eq!(head.len(), 24);
        assert_eq!(tail.len(), 76);

        let mut out = [0u8; 100];
        assert!(rx.copy_out(&mut out));
        assert_eq!(&out[..], &payload[..]);
        rx.consume(100);
        assert_eq!(rx.available(), 0);
    }

    #[test]
    fn test_ready_flag() {
        let (tx, rx) = ring(4096, 512);
        assert!(!rx.is_ready());
        tx.set_ready(true);
        assert!(rx.is_ready());
        tx.set_ready(false);
        assert!(!rx.is_ready());
    }

    #[test]
    fn test_buffer_too_small() {
        let arena = PageArena::new(&ArenaConfig::with_pages(4096, 4, 4)).unwrap();
        let pages = Arc::new(arena.alloc(1).unwrap());
        assert!(matches!(
            RingChannel::over_pages(pages, 8192, 512),
            Err(TransportError::RegionTooSmall { .. })
        ));
    }
}
