//! Page arena: reserved anonymous mapping plus the locked buddy allocator

use crate::buddy::PageAllocator;
use crate::error::{AllocError, AllocResult};
use crate::page::PageRun;
use memmap2::MmapMut;
use ndb_common::config::ArenaConfig;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Page accounting snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Pages under management
    pub allocated: u32,
    /// Pages currently granted
    pub used: u32,
    /// Pages on the free lists
    pub free: u32,
}

/// Fixed-size page pool shared by every component needing pages.
///
/// The mapping covers `max_pages` up front, so `grow` only hands more of
/// it to the allocator and granted pages never move.
pub struct PageArena {
    _mmap: MmapMut,
    base: NonNull<u8>,
    page_size: usize,
    max_pages: u32,
    allocator: Mutex<PageAllocator>,
}

// SAFETY: `base` points into `_mmap`, owned by the arena and never remapped.
// Disjoint runs are handed to distinct `PageBuffer`s; bookkeeping is locked.
unsafe impl Send for PageArena {}
unsafe impl Sync for PageArena {}

impl PageArena {
    /// Reserve `max_pages` and register `initial_pages` as free.
    pub fn new(config: &ArenaConfig) -> AllocResult<Arc<Self>> {
        config.validate()?;

        let bytes = config.max_pages as usize * config.page_size;
        let mut mmap = MmapMut::map_anon(bytes)?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| {
            AllocError::Io {
                source: std::io::Error::other("anonymous mapping returned null"),
            }
        })?;

        let mut allocator = PageAllocator::new(config.group_pages)?;
        allocator.init(config.initial_pages)?;

        info!(
            "Page arena ready: {} x {}B pages ({} reserved)",
            config.initial_pages, config.page_size, config.max_pages
        );

        Ok(Arc::new(Self {
            _mmap: mmap,
            base,
            page_size: config.page_size,
            max_pages: config.max_pages,
            allocator: Mutex::new(allocator),
        }))
    }

    /// Bytes per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reserved page limit for `grow`.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Grant at least `min_pages` pages as an owned buffer.
    pub fn alloc(self: &Arc<Self>, min_pages: u32) -> AllocResult<PageBuffer> {
        let run = self.allocator.lock().alloc(min_pages)?;
        Ok(self.wrap(run))
    }

    /// Grant enough pages to hold `bytes` bytes.
    pub fn alloc_bytes(self: &Arc<Self>, bytes: usize) -> AllocResult<PageBuffer> {
        self.alloc(self.pages_for(bytes)?)
    }

    /// Like [`alloc`](Self::alloc), growing the arena within `max_pages`
    /// when no free run is large enough.
    ///
    /// Growth extends the arena past the next boundary aligned to the grant
    /// size, so the new pages always hold one aligned run of that size.
    pub fn alloc_or_grow(self: &Arc<Self>, min_pages: u32) -> AllocResult<PageBuffer> {
        let mut allocator = self.allocator.lock();
        let run = match allocator.alloc(min_pages) {
            Err(AllocError::Exhausted { .. }) => {
                let granted = min_pages.next_power_of_two() as u64;
                let allocated = allocator.allocated_pages() as u64;
                let target = allocated.next_multiple_of(granted) + granted;
                if target > self.max_pages as u64 {
                    return Err(AllocError::ArenaLimit {
                        requested: target,
                        max: self.max_pages,
                    });
                }
                allocator.grow((target - allocated) as u32)?;
                debug!("Arena grown to {} pages for a {}-page grant", target, granted);
                allocator.alloc(min_pages)?
            }
            other => other?,
        };
        drop(allocator);
        Ok(self.wrap(run))
    }

    /// Byte-sized [`alloc_or_grow`](Self::alloc_or_grow).
    pub fn alloc_bytes_or_grow(self: &Arc<Self>, bytes: usize) -> AllocResult<PageBuffer> {
        self.alloc_or_grow(self.pages_for(bytes)?)
    }

    fn pages_for(&self, bytes: usize) -> AllocResult<u32> {
        let pages = bytes.div_ceil(self.page_size).max(1);
        u32::try_from(pages).map_err(|_| AllocError::TooLarge {
            requested: u32::MAX,
            max: ndb_common::consts::MAX_RUN_PAGES,
        })
    }

    /// Hand `extra_pages` more of the reserved mapping to the allocator.
    pub fn grow(&self, extra_pages: u32) -> AllocResult<()> {
        let mut allocator = self.allocator.lock();
        let requested = allocator.allocated_pages() as u64 + extra_pages as u64;
        if requested > self.max_pages as u64 {
            return Err(AllocError::ArenaLimit {
                requested,
                max: self.max_pages,
            });
        }
        allocator.grow(extra_pages)
    }

    /// Current page accounting.
    pub fn stats(&self) -> ArenaStats {
        let allocator = self.allocator.lock();
        ArenaStats {
            allocated: allocator.allocated_pages(),
            used: allocator.used_pages(),
            free: allocator.free_pages(),
        }
    }

    /// Run the allocator consistency check.
    pub fn verify(&self) -> Result<(), String> {
        self.allocator.lock().verify()
    }

    /// Log free list occupancy.
    pub fn dump(&self) {
        self.allocator.lock().dump();
    }

    fn wrap(self: &Arc<Self>, run: PageRun) -> PageBuffer {
        let offset = run.start.as_usize() * self.page_size;
        // SAFETY: the run lies inside `allocated <= max_pages`, hence inside the mapping.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        PageBuffer {
            arena: Arc::clone(self),
            run,
            ptr,
            len: run.count as usize * self.page_size,
        }
    }
}

impl std::fmt::Debug for PageArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageArena")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pages granted from a [`PageArena`], returned on drop.
pub struct PageBuffer {
    arena: Arc<PageArena>,
    run: PageRun,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer exclusively owns its run of the arena mapping.
unsafe impl Send for PageBuffer {}
unsafe impl Sync for PageBuffer {}

impl PageBuffer {
    /// Pages backing this buffer.
    pub fn run(&self) -> PageRun {
        self.run
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true; a grant holds at least one page.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw base pointer, for structures shared through `Arc<PageBuffer>`.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Read-only view.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+len is inside the mapping and owned by this buffer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable view.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` excludes other views.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.arena.allocator.lock().release(self.run) {
            error!("Failed to return {} x{}: {}", self.run.start, self.run.count, e);
        }
    }
}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("run", &self.run)
            .field("len", &self.len)
            .finish()
    }
}
