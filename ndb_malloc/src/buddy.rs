//! Buddy allocator bookkeeping over page indices
//!
//! Free runs are always power-of-two sized and aligned to their size, so
//! the buddy of a run `[start, start + count)` is found by flipping the
//! `count` bit of `start`. Each free run sits on the list of its class and
//! carries boundary bits at its first and last page; a side table keeps the
//! list links and the run size at both boundary pages.
//!
//! `PageAllocator` only tracks indices. Backing memory lives in
//! [`PageArena`](crate::arena::PageArena).

use crate::boundary::{BoundaryMap, FIRST_BIT, LAST_BIT};
use crate::error::{AllocError, AllocResult};
use crate::page::{PageIndex, PageRun, class_for_request, class_of};
use ndb_common::consts::{BUDDY_CLASSES, MAX_RUN_PAGES};
use tracing::{debug, trace};

/// Per-page free run data, valid at the first and last page of a free run
#[derive(Debug, Clone, Copy, Default)]
struct FreePageData {
    list: Option<u8>,
    next: Option<PageIndex>,
    prev: Option<PageIndex>,
    size: u32,
}

/// Buddy allocator over a flat, growable range of page indices
pub struct PageAllocator {
    free_lists: [Option<PageIndex>; BUDDY_CLASSES],
    pages: Vec<FreePageData>,
    boundary: BoundaryMap,
    allocated: u32,
    used: u32,
    free: u32,
}

impl PageAllocator {
    /// Empty allocator; `group_pages` sets the boundary bitmap granularity.
    ///
    /// A group must be a power of two holding the largest run, so a free
    /// run never spans two bitmaps.
    pub fn new(group_pages: u32) -> AllocResult<Self> {
        if !group_pages.is_power_of_two() || group_pages < MAX_RUN_PAGES {
            return Err(AllocError::InvalidGroupSize {
                group_pages,
                min: MAX_RUN_PAGES,
            });
        }
        Ok(Self {
            free_lists: [None; BUDDY_CLASSES],
            pages: Vec::new(),
            boundary: BoundaryMap::new(group_pages),
            allocated: 0,
            used: 0,
            free: 0,
        })
    }

    /// Register the initial `pages` of an empty allocator.
    pub fn init(&mut self, pages: u32) -> AllocResult<()> {
        debug_assert_eq!(self.allocated, 0, "init on a populated allocator");
        self.grow(pages)
    }

    /// Pages under management.
    pub fn allocated_pages(&self) -> u32 {
        self.allocated
    }

    /// Pages currently granted.
    pub fn used_pages(&self) -> u32 {
        self.used
    }

    /// Pages on the free lists.
    pub fn free_pages(&self) -> u32 {
        self.free
    }

    /// Grant a run of at least `min_pages` pages.
    ///
    /// The grant is `2^ceil(log2(min_pages))` pages. Larger free runs are
    /// split in halves, each upper half going back one class lower.
    pub fn alloc(&mut self, min_pages: u32) -> AllocResult<PageRun> {
        if min_pages == 0 {
            return Err(AllocError::ZeroPages);
        }
        if min_pages > MAX_RUN_PAGES {
            return Err(AllocError::TooLarge {
                requested: min_pages,
                max: MAX_RUN_PAGES,
            });
        }

        let want = class_for_request(min_pages);
        let Some(mut class) = (want..BUDDY_CLASSES).find(|&k| self.free_lists[k].is_some())
        else {
            return Err(AllocError::Exhausted {
                requested: min_pages,
                free: self.free,
            });
        };

        let Some(start) = self.free_lists[class] else {
            return Err(AllocError::Exhausted {
                requested: min_pages,
                free: self.free,
            });
        };
        self.remove_free_list(start, class);

        while class > want {
            class -= 1;
            let half = 1u32 << class;
            self.insert_free_list(PageRun::new(start.offset(half), half));
        }

        let run = PageRun::new(start, 1 << want);
        self.used += run.count;
        trace!("alloc {} pages -> {} x{}", min_pages, run.start, run.count);
        Ok(run)
    }

    /// Return a granted run, merging with free buddies upward.
    ///
    /// Rejects runs that are not power-of-two sized and aligned, lie outside
    /// the arena, or overlap a run that is already free.
    pub fn release(&mut self, run: PageRun) -> AllocResult<()> {
        let invalid = AllocError::InvalidRelease {
            start: run.start.get(),
            count: run.count,
        };
        if !run.count.is_power_of_two()
            || run.count > MAX_RUN_PAGES
            || !run.start.is_aligned_to(run.count)
            || run.start.get() as u64 + run.count as u64 > self.allocated as u64
            || run.count > self.used
            || self.overlaps_free(run)
        {
            return Err(invalid);
        }

        self.used -= run.count;
        self.release_impl(run);
        trace!("release {} x{}", run.start, run.count);
        Ok(())
    }

    /// Extend the arena by `extra_pages` fresh free pages.
    ///
    /// The new range is cut into maximal aligned power-of-two blocks, each
    /// released so it merges with a free run left at the old end.
    pub fn grow(&mut self, extra_pages: u32) -> AllocResult<()> {
        if extra_pages == 0 {
            return Ok(());
        }
        let old = self.allocated;
        let Some(new_total) = old.checked_add(extra_pages) else {
            return Err(AllocError::ArenaLimit {
                requested: old as u64 + extra_pages as u64,
                max: u32::MAX,
            });
        };

        self.pages.resize(new_total as usize, FreePageData::default());
        self.boundary.ensure(new_total);
        self.allocated = new_total;

        let mut cur = old;
        while cur < new_total {
            let align = if cur == 0 {
                MAX_RUN_PAGES
            } else {
                (1u32 << cur.trailing_zeros()).min(MAX_RUN_PAGES)
            };
            let mut size = align;
            while size > new_total - cur {
                size >>= 1;
            }
            self.release_impl(PageRun::new(PageIndex::new(cur), size));
            cur += size;
        }

        debug!(
            "Arena grown by {} pages to {} ({} free)",
            extra_pages, self.allocated, self.free
        );
        Ok(())
    }

    /// Snapshot of all free runs, by ascending class.
    pub fn free_runs(&self) -> Vec<PageRun> {
        let mut runs = Vec::new();
        for head in self.free_lists.iter() {
            let mut cursor = *head;
            while let Some(page) = cursor {
                let data = self.pages[page.as_usize()];
                runs.push(PageRun::new(page, data.size));
                cursor = data.next;
            }
        }
        runs
    }

    /// Number of free runs on the list of `class`.
    pub fn list_len(&self, class: usize) -> usize {
        let mut len = 0;
        let mut cursor = self.free_lists.get(class).copied().flatten();
        while let Some(page) = cursor {
            len += 1;
            cursor = self.pages[page.as_usize()].next;
        }
        len
    }

    /// Check every bookkeeping invariant; describes the first violation.
    pub fn verify(&self) -> Result<(), String> {
        let mut free_total = 0u64;
        let mut runs = 0u32;
        let mut seen = Vec::new();

        for (class, head) in self.free_lists.iter().enumerate() {
            let mut prev = None;
            let mut cursor = *head;
            while let Some(page) = cursor {
                let data = self.pages[page.as_usize()];
                let run = PageRun::new(page, data.size);
                if data.list != Some(class as u8) {
                    return Err(format!("{page} on list {class} tagged {:?}", data.list));
                }
                if data.prev != prev {
                    return Err(format!("{page} prev link {:?}, expected {prev:?}", data.prev));
                }
                if data.size != 1 << class {
                    return Err(format!("{page} size {} on list {class}", data.size));
                }
                if !page.is_aligned_to(data.size) || run.end() > self.allocated {
                    return Err(format!("{page} x{} misplaced", data.size));
                }
                if self.boundary.check(page, run.last()) != FIRST_BIT | LAST_BIT {
                    return Err(format!("{page} x{} missing boundary bits", data.size));
                }
                let tail = self.pages[run.last().as_usize()];
                if tail.size != data.size || tail.list != data.list {
                    return Err(format!("{page} x{} tail data stale", data.size));
                }
                if data.size < MAX_RUN_PAGES && self.is_free_run(page.buddy(data.size), data.size)
                {
                    return Err(format!("{page} x{} has an unmerged free buddy", data.size));
                }
                free_total += data.size as u64;
                runs += 1;
                seen.push(run);
                prev = Some(page);
                cursor = data.next;
            }
        }

        seen.sort_by_key(|run| run.start);
        if let Some(pair) = seen.windows(2).find(|w| w[0].end() > w[1].start.get()) {
            return Err(format!("free runs {:?} and {:?} overlap", pair[0], pair[1]));
        }
        if free_total != self.free as u64 {
            return Err(format!("free lists hold {free_total} pages, counter {}", self.free));
        }
        if self.free as u64 + self.used as u64 != self.allocated as u64 {
            return Err(format!(
                "free {} + used {} != allocated {}",
                self.free, self.used, self.allocated
            ));
        }
        if self.boundary.count_marks() != 2 * runs {
            return Err(format!(
                "{} boundary marks for {runs} free runs",
                self.boundary.count_marks()
            ));
        }
        Ok(())
    }

    /// Log the free list occupancy at debug level.
    pub fn dump(&self) {
        debug!(
            "PageAllocator: allocated={} used={} free={}",
            self.allocated, self.used, self.free
        );
        for class in 0..BUDDY_CLASSES {
            let len = self.list_len(class);
            if len > 0 {
                debug!("  class {:2} ({:5} pages): {} runs", class, 1u32 << class, len);
            }
        }
    }

    fn release_impl(&mut self, run: PageRun) {
        let mut start = run.start;
        let mut count = run.count;

        while count < MAX_RUN_PAGES {
            let buddy = start.buddy(count);
            if !self.is_free_run(buddy, count) {
                break;
            }
            self.remove_free_list(buddy, class_of(count));
            start = start.min(buddy);
            count <<= 1;
        }

        self.insert_free_list(PageRun::new(start, count));
    }

    fn is_free_run(&self, start: PageIndex, count: u32) -> bool {
        start.get() as u64 + count as u64 <= self.allocated as u64
            && self.boundary.is_run_start(start)
            && self.pages[start.as_usize()].size == count
    }

    /// Any free run containing `run.start` or starting inside `run`.
    fn overlaps_free(&self, run: PageRun) -> bool {
        let containing = (0..BUDDY_CLASSES).any(|class| {
            let size = 1u32 << class;
            self.is_free_run(PageIndex::new(run.start.get() & !(size - 1)), size)
        });
        containing
            || (run.start.get() + 1..run.end())
                .any(|page| self.boundary.is_run_start(PageIndex::new(page)))
    }

    fn insert_free_list(&mut self, run: PageRun) {
        let class = run.class();
        let old_head = self.free_lists[class];
        if let Some(head) = old_head {
            self.pages[head.as_usize()].prev = Some(run.start);
        }

        self.pages[run.start.as_usize()] = FreePageData {
            list: Some(class as u8),
            next: old_head,
            prev: None,
            size: run.count,
        };
        if run.count > 1 {
            self.pages[run.last().as_usize()] = FreePageData {
                list: Some(class as u8),
                next: None,
                prev: None,
                size: run.count,
            };
        }

        self.boundary.set(run.start, run.last());
        self.free_lists[class] = Some(run.start);
        self.free += run.count;
    }

    fn remove_free_list(&mut self, start: PageIndex, class: usize) {
        let data = self.pages[start.as_usize()];
        debug_assert_eq!(data.list, Some(class as u8));

        match data.prev {
            Some(prev) => self.pages[prev.as_usize()].next = data.next,
            None => self.free_lists[class] = data.next,
        }
        if let Some(next) = data.next {
            self.pages[next.as_usize()].prev = data.prev;
        }

        let run = PageRun::new(start, data.size);
        self.boundary.clear(run.start, run.last());
        self.pages[run.start.as_usize()] = FreePageData::default();
        self.pages[run.last().as_usize()] = FreePageData::default();
        self.free -= data.size;
    }
}

impl std::fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("allocated", &self.allocated)
            .field("used", &self.used)
            .field("free", &self.free)
            .finish()
    }
}
