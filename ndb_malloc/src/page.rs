//! Page index newtype and page runs

use std::fmt;

/// Index of one page within the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(u32);

impl PageIndex {
    /// Wrap a raw page number.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw page number.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Page `pages` after this one.
    #[inline]
    pub const fn offset(self, pages: u32) -> Self {
        Self(self.0 + pages)
    }

    /// Start of the buddy of the aligned run `[self, self + count)`.
    ///
    /// Both runs share the parent run of `2 * count` pages.
    #[inline]
    pub const fn buddy(self, count: u32) -> Self {
        Self(self.0 ^ count)
    }

    /// Whether this page starts a run of `count` pages aligned to its size.
    #[inline]
    pub const fn is_aligned_to(self, count: u32) -> bool {
        self.0 & (count - 1) == 0
    }

    /// Usable as an index into per-page tables.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", self.0)
    }
}

/// A contiguous run of pages granted by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRun {
    /// First page.
    pub start: PageIndex,
    /// Number of pages, always a power of two.
    pub count: u32,
}

impl PageRun {
    /// Construct a run.
    #[inline]
    pub const fn new(start: PageIndex, count: u32) -> Self {
        Self { start, count }
    }

    /// Last page of the run.
    #[inline]
    pub const fn last(&self) -> PageIndex {
        PageIndex(self.start.0 + self.count - 1)
    }

    /// One past the last page.
    #[inline]
    pub const fn end(&self) -> u32 {
        self.start.0 + self.count
    }

    /// Size class of the run: floor(log2(count)), capped at 15.
    #[inline]
    pub fn class(&self) -> usize {
        class_of(self.count)
    }
}

/// floor(log2(pages)), capped at the top class.
#[inline]
pub(crate) fn class_of(pages: u32) -> usize {
    debug_assert!(pages > 0);
    (31 - pages.leading_zeros() as usize).min(ndb_common::consts::BUDDY_CLASSES - 1)
}

/// ceil(log2(pages)); `pages` must be positive.
#[inline]
pub(crate) fn class_for_request(pages: u32) -> usize {
    debug_assert!(pages > 0);
    if pages == 1 {
        0
    } else {
        32 - (pages - 1).leading_zeros() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buddy_arithmetic() {
        assert_eq!(PageIndex::new(0).buddy(4), PageIndex::new(4));
        assert_eq!(PageIndex::new(4).buddy(4), PageIndex::new(0));
        assert_eq!(PageIndex::new(8).buddy(8), PageIndex::new(0));
        assert_eq!(PageIndex::new(12).buddy(2), PageIndex::new(14));
    }

    #[test]
    fn test_alignment() {
        assert!(PageIndex::new(8).is_aligned_to(8));
        assert!(!PageIndex::new(12).is_aligned_to(8));
        assert!(PageIndex::new(5).is_aligned_to(1));
    }

    #[test]
    fn test_classes() {
        assert_eq!(class_of(1), 0);
        assert_eq!(class_of(4), 2);
        assert_eq!(class_of(7), 2);
        assert_eq!(class_of(1 << 15), 15);
        assert_eq!(class_of(1 << 20), 15);

        assert_eq!(class_for_request(1), 0);
        assert_eq!(class_for_request(3), 2);
        assert_eq!(class_for_request(4), 2);
        assert_eq!(class_for_request(5), 3);
    }

    #[test]
    fn test_run_bounds() {
        let run = PageRun::new(PageIndex::new(8), 4);
        assert_eq!(run.last(), PageIndex::new(11));
        assert_eq!(run.end(), 12);
        assert_eq!(run.class(), 2);
    }
}
