//! Process-wide singleton access to a `Vlad` instance: the free-function
//! surface used when callers do not want to carry a `Vlad` handle
//! themselves.
//!
//! A `spin::Mutex`-guarded `static` populated once at startup, holding a
//! single `Option` slot with no multi-CPU bring-up bookkeeping, since this
//! allocator has no notion of multiple cores.

use std::ptr::NonNull;

use log::warn;
use spin::Mutex;

use crate::allocator::Vlad;

static ALLOCATOR: Mutex<Option<Vlad>> = Mutex::new(None);

/// Initializes the global allocator with an arena of at least `n` bytes.
/// Calling `init` while already initialized is a no-op: the existing arena
/// and all of its live allocations are left untouched. Failure to acquire
/// a fresh arena is the allocator's only fatal condition: this aborts the
/// process after logging why.
pub fn init(n: usize) {
    let mut guard = ALLOCATOR.lock();
    if guard.is_some() {
        warn!("init() called while already initialized; ignoring");
        return;
    }
    match Vlad::init(n) {
        Ok(v) => {
            *guard = Some(v);
        }
        Err(err) => {
            panic!("{err}");
        }
    }
}

/// Allocates `n` bytes from the global allocator.
///
/// # Panics
/// Panics if [`init`] has not been called (no global allocator to use).
pub fn allocate(n: usize) -> Option<NonNull<u8>> {
    let mut guard = ALLOCATOR.lock();
    let v = guard.as_mut().expect("allocator::init was never called");
    v.allocate(n)
}

/// Frees a pointer previously returned by [`allocate`].
///
/// # Panics
/// Panics if [`init`] has not been called.
pub fn free(ptr: NonNull<u8>) {
    let mut guard = ALLOCATOR.lock();
    let v = guard.as_mut().expect("allocator::init was never called");
    v.free(ptr);
}

/// Tears down the global allocator, releasing its arena. A subsequent call
/// to `allocate`/`free` without an intervening `init` panics, same as if
/// `init` had never run.
pub fn teardown() {
    let mut guard = ALLOCATOR.lock();
    if guard.take().is_none() {
        warn!("teardown() called with no allocator initialized");
    }
}

/// Size, in bytes, of the global allocator's arena.
///
/// # Panics
/// Panics if [`init`] has not been called.
pub fn arena_size() -> usize {
    let guard = ALLOCATOR.lock();
    let v = guard.as_ref().expect("allocator::init was never called");
    v.arena_size()
}

/// Dumps a text listing of every free block in the global allocator.
///
/// # Panics
/// Panics if [`init`] has not been called.
pub fn stats() -> String {
    let guard = ALLOCATOR.lock();
    let v = guard.as_ref().expect("allocator::init was never called");
    v.stats()
}

/// Renders the global allocator's current arena as the ANSI 2D grid plus
/// size tables, labeling up to 26 of `labels`' allocated blocks with the
/// letters `'a'..='z'` in order.
///
/// # Panics
/// Panics if [`init`] has not been called.
pub fn reveal(labels: &[NonNull<u8>]) -> String {
    let guard = ALLOCATOR.lock();
    let v = guard.as_ref().expect("allocator::init was never called");
    crate::visualizer::reveal(v, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests run single-threaded against the shared global, so each test
    // takes care to init and teardown around its own use.

    #[test]
    fn init_allocate_free_teardown_round_trip() {
        init(1024);
        let p = allocate(100).unwrap();
        free(p);
        teardown();
    }

    #[test]
    #[should_panic]
    fn allocate_before_init_panics() {
        teardown(); // ensure a clean slate regardless of test ordering
        allocate(10);
    }

    #[test]
    fn reinit_while_initialized_is_a_no_op() {
        teardown(); // ensure a clean slate regardless of test ordering
        init(1024);
        let p = allocate(64).unwrap();

        // a second init() call must leave the first arena, and this live
        // allocation, completely untouched.
        init(4096);
        assert_eq!(arena_size(), 1024);

        free(p);
        teardown();
    }
}
