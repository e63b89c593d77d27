//! Owns the single contiguous byte region the allocator manages, and the
//! address-to-offset bookkeeping needed to talk about blocks by `u32`
//! offset rather than by pointer.
//!
//! A raw `Layout`-acquired region with a separately-tracked size; fixed
//! once acquired, with no `extend`/realloc path.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::config::HEADER_SIZE;
use crate::error::AcquisitionError;
use crate::header::BlockHeader;

/// A single contiguous, power-of-two-sized byte region.
#[derive(Debug)]
pub struct Arena {
    base: NonNull<u8>,
    size: usize,
    layout: Layout,
}

// SAFETY: `Arena` is the sole owner of the region it points to; it is never
// aliased outside of the `Vlad` that owns it. This `Send` impl only lets
// the allocator live behind a single `spin::Mutex`-guarded global, not be
// used concurrently from multiple threads at once.
unsafe impl Send for Arena {}

impl Arena {
    /// Acquires a fresh `size`-byte region from the host allocator. `size`
    /// must already be rounded up to the smallest power of two `>= 512`;
    /// this function does not perform that rounding.
    pub fn acquire(size: usize) -> Result<Self, AcquisitionError> {
        debug_assert!(size.is_power_of_two());
        debug_assert!(size >= HEADER_SIZE);

        // natural alignment of the header is sufficient for every block,
        // since no block smaller than the header is ever created.
        let layout = Layout::from_size_align(size, std::mem::align_of::<BlockHeader>())
            .map_err(|_| AcquisitionError { requested_size: size })?;

        // SAFETY: `layout` has nonzero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or(AcquisitionError { requested_size: size })?;

        Ok(Arena { base, size, layout })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Converts a block's header offset into the payload pointer returned to callers.
    #[inline]
    pub fn payload_ptr(&self, header_offset: u32) -> NonNull<u8> {
        debug_assert!((header_offset as usize) + HEADER_SIZE <= self.size);
        // SAFETY: offset is within the arena by the precondition above.
        unsafe { NonNull::new_unchecked(self.base_ptr().add(header_offset as usize + HEADER_SIZE)) }
    }

    /// Converts a payload pointer previously returned by `payload_ptr` back
    /// into its header's offset. Returns `None` if `ptr` does not point
    /// into this arena at a valid header-aligned payload start.
    pub fn header_offset_of(&self, ptr: NonNull<u8>) -> Option<u32> {
        let base = self.base_ptr() as usize;
        let addr = ptr.as_ptr() as usize;

        let payload_offset = addr.checked_sub(base)?;
        let header_offset = payload_offset.checked_sub(HEADER_SIZE)?;

        if header_offset < self.size {
            Some(header_offset as u32)
        } else {
            None
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`self.layout` are exactly as returned by `acquire`.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}
