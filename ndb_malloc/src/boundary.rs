//! Boundary bitmaps marking the first and last page of every free run
//!
//! Pages are split into groups of `group_pages`; each group owns two bit
//! planes (first-of-run, last-of-run). A run never crosses a group, so a
//! `(first, last)` pair always lands in one group.

use crate::page::PageIndex;

const WORD_BITS: u32 = u64::BITS;

/// Bit `0` of [`BoundaryMap::check`]: first-of-run bit at `first`.
pub const FIRST_BIT: u32 = 0b01;
/// Bit `1` of [`BoundaryMap::check`]: last-of-run bit at `last`.
pub const LAST_BIT: u32 = 0b10;

struct GroupBits {
    first: Vec<u64>,
    last: Vec<u64>,
}

impl GroupBits {
    fn new(words: usize) -> Self {
        Self {
            first: vec![0; words],
            last: vec![0; words],
        }
    }
}

/// Per-group first/last boundary bit planes
pub struct BoundaryMap {
    group_shift: u32,
    groups: Vec<GroupBits>,
}

impl BoundaryMap {
    /// Empty map with `group_pages` (a power of two, >= 64) pages per group.
    pub fn new(group_pages: u32) -> Self {
        debug_assert!(group_pages.is_power_of_two() && group_pages >= WORD_BITS);
        Self {
            group_shift: group_pages.trailing_zeros(),
            groups: Vec::new(),
        }
    }

    /// Pages covered by one group.
    pub fn group_pages(&self) -> u32 {
        1 << self.group_shift
    }

    /// Make sure bitmaps exist for pages `0..pages`.
    pub fn ensure(&mut self, pages: u32) {
        let needed = (pages as usize).div_ceil(self.group_pages() as usize);
        let words = (self.group_pages() / WORD_BITS) as usize;
        while self.groups.len() < needed {
            self.groups.push(GroupBits::new(words));
        }
    }

    #[inline]
    fn locate(&self, page: PageIndex) -> (usize, usize, u64) {
        let group = (page.get() >> self.group_shift) as usize;
        let bit = page.get() & (self.group_pages() - 1);
        (group, (bit / WORD_BITS) as usize, 1u64 << (bit % WORD_BITS))
    }

    #[inline]
    fn same_group(&self, first: PageIndex, last: PageIndex) -> bool {
        first.get() >> self.group_shift == last.get() >> self.group_shift
    }

    /// Mark `first` as first-of-run and `last` as last-of-run.
    pub fn set(&mut self, first: PageIndex, last: PageIndex) {
        debug_assert!(self.same_group(first, last));
        let (g, w, m) = self.locate(first);
        self.groups[g].first[w] |= m;
        let (g, w, m) = self.locate(last);
        self.groups[g].last[w] |= m;
    }

    /// Clear the boundary bits of a run.
    pub fn clear(&mut self, first: PageIndex, last: PageIndex) {
        debug_assert!(self.same_group(first, last));
        let (g, w, m) = self.locate(first);
        self.groups[g].first[w] &= !m;
        let (g, w, m) = self.locate(last);
        self.groups[g].last[w] &= !m;
    }

    /// `FIRST_BIT` if `first` starts a free run, `LAST_BIT` if `last` ends one.
    pub fn check(&self, first: PageIndex, last: PageIndex) -> u32 {
        let mut ret = 0;
        if self.is_run_start(first) {
            ret |= FIRST_BIT;
        }
        if self.is_run_end(last) {
            ret |= LAST_BIT;
        }
        ret
    }

    /// Whether a free run starts at `page`.
    #[inline]
    pub fn is_run_start(&self, page: PageIndex) -> bool {
        let (g, w, m) = self.locate(page);
        self.groups
            .get(g)
            .is_some_and(|bits| bits.first[w] & m != 0)
    }

    /// Whether a free run ends at `page`.
    #[inline]
    pub fn is_run_end(&self, page: PageIndex) -> bool {
        let (g, w, m) = self.locate(page);
        self.groups.get(g).is_some_and(|bits| bits.last[w] & m != 0)
    }

    /// Total number of bits set in both planes.
    pub fn count_marks(&self) -> u32 {
        self.groups
            .iter()
            .flat_map(|g| g.first.iter().chain(g.last.iter()))
            .map(|w| w.count_ones())
            .sum()
    }
}
