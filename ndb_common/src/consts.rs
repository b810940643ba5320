//! Transport and arena constants.
//!
//! These constants are the single source of truth for message sizing,
//! ring region layout and buddy allocator limits. All other crates import
//! from here.

use static_assertions::const_assert;

/// Largest serialized signal envelope in bytes.
///
/// Also the slack reserved at the tail of every ring channel, so a producer
/// can always lay down one maximal message without splitting it.
pub const MAX_MESSAGE_SIZE: usize = 32768;

/// Maximum number of body words carried by one signal.
pub const MAX_SIGNAL_BODY_WORDS: usize = 25;

/// Maximum number of variable-length sections attached to one signal.
pub const MAX_SECTIONS: usize = 3;

/// CPU cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Size of the cursor/flag header at the start of each ring region.
///
/// Layout: `[write cursor u32][read cursor u32][ready flag u32][reserved]`.
pub const RING_HEADER_SIZE: usize = CACHE_LINE_SIZE;

/// Smallest accepted per-direction channel capacity in bytes.
pub const MIN_CHANNEL_CAPACITY: u32 = 2 * MAX_MESSAGE_SIZE as u32;

/// Largest accepted per-direction channel capacity in bytes.
pub const MAX_CHANNEL_CAPACITY: u32 = 64 * 1024 * 1024;

/// Default per-direction channel capacity in bytes.
pub const DEFAULT_CHANNEL_CAPACITY: u32 = 1024 * 1024;

/// Default page size: 8192 words.
pub const DEFAULT_PAGE_SIZE: usize = 32768;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Number of buddy free lists.
pub const BUDDY_CLASSES: usize = 16;

/// Largest run the buddy allocator will form or grant (class 15).
pub const MAX_RUN_PAGES: u32 = 1 << (BUDDY_CLASSES - 1);

/// Default number of pages covered by one boundary bitmap (2^18).
pub const DEFAULT_GROUP_PAGES: u32 = 1 << 18;

const_assert!(RING_HEADER_SIZE >= 3 * core::mem::size_of::<u32>());
const_assert!(MAX_MESSAGE_SIZE % 4 == 0);
const_assert!(MIN_CHANNEL_CAPACITY as usize > MAX_MESSAGE_SIZE);
const_assert!(DEFAULT_GROUP_PAGES >= MAX_RUN_PAGES);
