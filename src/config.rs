//! Tunables and fixed constants for the allocator, collected in one place.

use core::mem::size_of;

use crate::header::BlockHeader;

/// Magic tag for a block currently threaded into the free ring.
pub const MAGIC_FREE: u32 = 0xDEAD_BEEF;
/// Magic tag for a block currently handed out to a caller.
pub const MAGIC_ALLOC: u32 = 0xBEEF_DEAD;

/// Size of the in-band header, in bytes: four `u32` fields, naturally aligned.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// The smallest arena `init` will ever create, regardless of the requested size.
pub const MIN_ARENA_SIZE: usize = 512;

/// The largest arena the visualizer is specified to render correctly.
pub const MAX_VISUALIZER_SIZE: usize = 16 * 1024 * 1024;

/// Width, in cells, of the visualizer's grid.
pub const VISUALIZER_WIDTH: usize = 32;
/// Height, in cells, of the visualizer's grid.
pub const VISUALIZER_HEIGHT: usize = 16;

/// Number of label slots the visualizer accepts for allocated blocks (`'a'..='z'`).
pub const VISUALIZER_LABEL_COUNT: usize = 26;
