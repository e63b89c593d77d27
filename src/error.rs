//! Typed failure reasons, kept distinct from the public null-returning
//! surface: callers deliberately get no detail, but we still want
//! something to log and assert against internally and in tests.

use core::fmt;

/// Why an allocation request could not be satisfied.
///
/// `allocate` itself only ever returns `Option<NonNull<u8>>` to callers —
/// this type exists for logging and for tests that want to tell the two
/// failure modes apart, which the public contract deliberately does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// `n + HEADER_SIZE` exceeds the arena size; no block could ever satisfy it.
    OversizeRequest { requested: usize, arena_size: usize },
    /// Every free block is either too small, or the only sufficiently large
    /// block is also the only free block (the preserve-one rule).
    OutOfMemory { target_size: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OversizeRequest { requested, arena_size } => write!(
                f,
                "requested {requested} bytes (plus header) exceeds the {arena_size} byte arena"
            ),
            AllocError::OutOfMemory { target_size } => {
                write!(f, "no free block of at least {target_size} bytes is available")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Why the arena could not be acquired during `init`. This is the
/// allocator's only fatal error: `init` aborts the process after logging
/// this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionError {
    pub requested_size: usize,
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to acquire {} bytes for the arena", self.requested_size)
    }
}

impl std::error::Error for AcquisitionError {}
