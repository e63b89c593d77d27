//! Core buddy allocation logic: best-fit search, splitting, freeing and
//! buddy coalescing.

use std::ptr::NonNull;

use log::{debug, trace};

use crate::arena::Arena;
use crate::config::{HEADER_SIZE, MAGIC_ALLOC, MAGIC_FREE, MIN_ARENA_SIZE};
use crate::error::{AcquisitionError, AllocError};
use crate::freelist::FreeList;
use crate::header::BlockHeader;

/// A single allocator instance: one arena, one free ring.
pub struct Vlad {
    arena: Arena,
    /// Offset of some member of the free ring, or `None` if nothing is free.
    head: Option<u32>,
}

/// Rounds `n` up to the next power of two, with a floor of `MIN_ARENA_SIZE`.
/// `n == 0` rounds to `MIN_ARENA_SIZE`.
fn round_up_po2(n: usize) -> usize {
    n.max(MIN_ARENA_SIZE).next_power_of_two()
}

/// The buddy of a block of `size` bytes living at `offset` bytes into the
/// arena: flipping the one bit that distinguishes the two halves of their
/// shared parent.
fn buddy_of(offset: u32, size: u32) -> u32 {
    offset ^ size
}

/// True if `offset` is the lower (address-wise) half of its buddy pair.
fn is_lower_buddy(offset: u32, size: u32) -> bool {
    (offset / size) % 2 == 0
}

impl Vlad {
    /// Creates a fresh allocator over a `round_up_po2(n)`-byte arena, with
    /// one single free block spanning the whole arena.
    pub fn init(n: usize) -> Result<Self, AcquisitionError> {
        let size = round_up_po2(n);
        debug!("initializing arena of {size} bytes (requested {n})");

        let mut arena = Arena::acquire(size)?;
        let header_offset = 0u32;
        let header = BlockHeader::free_singleton(header_offset, size as u32);

        let mut list = FreeList::new(&mut arena);
        list.set_header(header_offset, header);

        Ok(Vlad { arena, head: Some(header_offset) })
    }

    fn list(&mut self) -> FreeList<'_> {
        FreeList::new(&mut self.arena)
    }

    /// Finds the smallest free block at least `target` bytes: among blocks
    /// `>= target`, the smallest wins; ties broken by earliest encountered walking the ring
    /// from `head`. The preserve-one rule (never hand out the last
    /// remaining free block, unless it is the only block that can ever
    /// satisfy the request and the arena has just one free block overall)
    /// is resolved by the caller, not here: this only reports the best-fit
    /// candidate and whether it is the ring's sole member.
    fn find_best_fit(&self, target: u32) -> Option<(u32, bool)> {
        let head = self.head?;
        let mut best: Option<(u32, u32)> = None;
        let mut count = 0usize;

        for offset in self.free_offsets_from(head) {
            count += 1;
            let h = self.header_at(offset);
            debug_assert!(h.is_free());
            if h.size >= target {
                match best {
                    Some((_, best_size)) if best_size <= h.size => {}
                    _ => best = Some((offset, h.size)),
                }
            }
        }

        best.map(|(offset, _)| (offset, count == 1))
    }

    /// Read-only ring walk starting at `head`, without borrowing `self.arena` mutably.
    fn free_offsets_from(&self, head: u32) -> Vec<u32> {
        let mut offsets = Vec::new();
        let mut curr = head;
        loop {
            offsets.push(curr);
            curr = self.header_at(curr).next;
            if curr == head {
                break;
            }
        }
        offsets
    }

    /// Allocates `n` bytes, returning a pointer to the payload region.
    /// Rounds up to `n + HEADER_SIZE`, finds the best fit, applies the
    /// preserve-one rule, splits down to size, marks the winning block
    /// `ALLOC`, and unlinks it from the free ring.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        let arena_size = self.arena.size();
        let target = (n + HEADER_SIZE).next_power_of_two();

        if target > arena_size {
            trace!("{:?}", AllocError::OversizeRequest { requested: n, arena_size });
            return None;
        }
        let target = target as u32;

        let (offset, is_sole_free_block) = self.find_best_fit(target)?;
        let candidate_size = self.list().header(offset).size;

        // preserve-one: refuse only the exact-fit case, where taking the
        // ring's sole member leaves no free block behind at all. Splitting
        // a larger sole block is fine, since the leftover half(s) repopulate
        // the ring.
        if is_sole_free_block && candidate_size == target {
            trace!("{:?}", AllocError::OutOfMemory { target_size: target as usize });
            return None;
        }

        self.split_down_to(offset, target);

        let mut list = self.list();
        list.unlink(offset);
        let mut h = list.header(offset);
        h.magic = MAGIC_ALLOC;
        list.set_header(offset, h);

        if self.head == Some(offset) {
            // head was consumed; any remaining ring member works as the new
            // head, or there is none left.
            let remaining = h.next;
            self.head = if remaining == offset { None } else { Some(remaining) };
        }

        debug!("allocate({n}) -> offset {offset}, block size {target}");
        Some(self.arena.payload_ptr(offset))
    }

    /// Repeatedly halves the block at `offset` (currently `size` bytes,
    /// some size `>= target`) until it is exactly `target` bytes, threading
    /// each freed right half into the ring immediately after `offset`.
    fn split_down_to(&mut self, offset: u32, target: u32) {
        let mut size = self.list().header(offset).size;

        while size > target {
            let half = size / 2;
            let right_offset = offset + half;

            let mut left = self.list().header(offset);
            left.size = half;
            self.list().set_header(offset, left);

            let right = BlockHeader::free_singleton(right_offset, half);
            self.list().set_header(right_offset, right);
            self.list().splice_after(offset, right_offset);

            size = half;
        }
    }

    /// Returns a previously-allocated block to the free ring, coalescing
    /// with its buddy wherever possible.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let offset = match self.arena.header_offset_of(ptr) {
            Some(offset) => offset,
            None => {
                debug_assert!(false, "free() called with a pointer foreign to this arena");
                return;
            }
        };

        let mut h = self.list().header(offset);
        debug_assert!(h.is_alloc(), "free() called on a block that is not currently allocated");
        h.magic = MAGIC_FREE;
        self.list().set_header(offset, h);

        // Phase A: thread the newly-freed block into the ring in ascending
        // offset order, or start a brand new ring if none exists.
        let head = match self.head {
            Some(head) => {
                let mut list = self.list();
                let new_head = list.insert_sorted_by_offset(offset, head);
                new_head
            }
            None => {
                let singleton = BlockHeader::free_singleton(offset, h.size);
                self.list().set_header(offset, singleton);
                offset
            }
        };
        self.head = Some(head);

        // Phase B: repeatedly try to merge `offset` with its buddy, walking
        // outward as blocks grow.
        self.coalesce_from(offset);

        debug!("free(offset {offset})");
    }

    /// Repeatedly merges the block at `offset` with its buddy, so long as
    /// the buddy is itself free and exactly the same size. After each merge
    /// the surviving block's offset may shift to the buddy's (when `offset`
    /// was the upper half), so the walk continues from whichever offset now
    /// holds the merged block.
    fn coalesce_from(&mut self, mut offset: u32) {
        loop {
            let h = self.list().header(offset);
            let size = h.size;
            let arena_size = self.arena.size() as u32;

            if size >= arena_size {
                break;
            }

            let buddy = buddy_of(offset, size);
            let buddy_h = self.list().header(buddy);

            if !buddy_h.is_free() || buddy_h.size != size {
                break;
            }

            // merge: the lower-addressed of the pair survives and grows to
            // the combined size; the upper-addressed one is unlinked from
            // the ring entirely. Right merge (`offset` is lower) removes
            // `buddy`; left merge (`offset` is upper) removes `offset`
            // itself and the walk continues from `buddy`.
            let merged_offset = if is_lower_buddy(offset, size) { offset } else { buddy };
            let removed_offset = if merged_offset == offset { buddy } else { offset };

            self.list().unlink(removed_offset);
            if self.head == Some(removed_offset) {
                let remaining = self.list().header(removed_offset).next;
                self.head = if remaining == removed_offset { None } else { Some(remaining) };
            }

            let mut merged = self.list().header(merged_offset);
            merged.size = size * 2;
            self.list().set_header(merged_offset, merged);

            offset = merged_offset;
        }
    }

    pub fn arena_size(&self) -> usize {
        self.arena.size()
    }

    /// Converts a payload pointer previously returned by `allocate` back
    /// into its header's offset, for the visualizer's label table.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<u32> {
        self.arena.header_offset_of(ptr)
    }

    /// Dumps a text listing of every free block, starting at `head` and
    /// walking the free ring once.
    pub fn stats(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        writeln!(out, "Free Block(s):").unwrap();

        match self.head {
            None => {
                writeln!(out, "(none)").unwrap();
            }
            Some(head) => {
                for (i, offset) in self.free_offsets_from(head).into_iter().enumerate() {
                    let h = self.header_at(offset);
                    writeln!(
                        out,
                        "{}: addr = {}, size = {}, next = {}, prev = {}, magic = {}",
                        i + 1,
                        offset,
                        h.size,
                        h.next,
                        h.prev,
                        if h.is_alloc() { "ALLOC" } else { "FREE" },
                    )
                    .unwrap();
                }
            }
        }

        out
    }

    pub(crate) fn header_at(&self, offset: u32) -> BlockHeader {
        // SAFETY: callers within this crate only ever pass offsets obtained
        // from this same allocator's own bookkeeping.
        unsafe { crate::header::read_header(self.arena.base_ptr(), offset) }
    }

    pub(crate) fn free_offsets(&self) -> Vec<u32> {
        match self.head {
            Some(head) => self.free_offsets_from(head),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks every header in the arena and asserts the universal invariants
    /// hold: headers partition the arena with no gaps or overlaps, every
    /// free block appears in exactly the free ring, and no two adjacent
    /// free blocks share a buddy relationship (else they should have
    /// coalesced).
    fn check_invariants(v: &Vlad) {
        let arena_size = v.arena_size() as u32;
        let mut offset = 0u32;
        let mut free_by_walk = Vec::new();

        while offset < arena_size {
            let h = v.header_at(offset);
            assert!(h.is_free() || h.is_alloc(), "block at {offset} has corrupt magic");
            assert!(h.size.is_power_of_two());
            assert!(offset + h.size <= arena_size);
            if h.is_free() {
                free_by_walk.push(offset);
            }
            offset += h.size;
        }
        assert_eq!(offset, arena_size, "blocks must exactly partition the arena");

        let mut free_by_ring = v.free_offsets();
        free_by_ring.sort_unstable();
        let mut free_by_walk_sorted = free_by_walk.clone();
        free_by_walk_sorted.sort_unstable();
        assert_eq!(free_by_ring, free_by_walk_sorted, "free ring must match free blocks by address walk");

        for &offset in &free_by_walk {
            let size = v.header_at(offset).size;
            let buddy = buddy_of(offset, size);
            if buddy < arena_size {
                let buddy_h = v.header_at(buddy);
                if buddy_h.is_free() {
                    assert_ne!(buddy_h.size, size, "free buddies of equal size should have coalesced");
                }
            }
        }
    }

    /// Walks the arena linearly and asserts it matches `expected` exactly,
    /// block for block: `(offset, size, is_alloc)` triples in address order.
    fn assert_blocks(v: &Vlad, expected: &[(u32, u32, bool)]) {
        let arena_size = v.arena_size() as u32;
        let mut offset = 0u32;
        let mut actual = Vec::new();
        while offset < arena_size {
            let h = v.header_at(offset);
            actual.push((offset, h.size, h.is_alloc()));
            offset += h.size;
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn init_rounds_up_and_floors_at_min_size() {
        let v = Vlad::init(100).unwrap();
        assert_eq!(v.arena_size(), MIN_ARENA_SIZE);
        check_invariants(&v);

        let v = Vlad::init(1000).unwrap();
        assert_eq!(v.arena_size(), 1024);
    }

    #[test]
    fn single_allocation_splits_down_to_fit() {
        let mut v = Vlad::init(1024).unwrap();
        let p = v.allocate(100).unwrap();
        assert!(v.arena.header_offset_of(p).is_some());
        check_invariants(&v);
    }

    #[test]
    fn first_allocation_yields_the_exact_documented_topology() {
        // init(1024) -> allocate(100): target = 128 (>= 100 + 16), splitting
        // the whole arena down to {0,128,A},{128,128,F},{256,256,F},{512,512,F}.
        let mut v = Vlad::init(1024).unwrap();
        let p = v.allocate(100).unwrap();
        assert_blocks(&v, &[(0, 128, true), (128, 128, false), (256, 256, false), (512, 512, false)]);
        assert_eq!(v.arena.header_offset_of(p).unwrap(), 0);
        check_invariants(&v);
    }

    #[test]
    fn second_equal_allocation_takes_the_freed_buddy() {
        // a second allocate(100) takes the {128,128,F} block rather than
        // splitting further: {0,128,A},{128,128,A},{256,256,F},{512,512,F}.
        let mut v = Vlad::init(1024).unwrap();
        let first = v.allocate(100).unwrap();
        let second = v.allocate(100).unwrap();
        assert_blocks(&v, &[(0, 128, true), (128, 128, true), (256, 256, false), (512, 512, false)]);
        assert_eq!(v.arena.header_offset_of(second).unwrap(), 128);
        check_invariants(&v);

        // freeing the first of the pair does not coalesce: its buddy at
        // 128 is still allocated, so {0,128,F},{128,128,A},{256,256,F},{512,512,F}.
        v.free(first);
        assert_blocks(&v, &[(0, 128, false), (128, 128, true), (256, 256, false), (512, 512, false)]);
        check_invariants(&v);

        // freeing the second then cascades: 0+128 merges to 256, which
        // merges with the existing {256,256,F} to 512, which merges with
        // {512,512,F} back into a single {0,1024,F}.
        v.free(second);
        assert_blocks(&v, &[(0, 1024, false)]);
        check_invariants(&v);
    }

    #[test]
    fn oversize_request_forced_by_the_preserve_one_rule_returns_none() {
        // init(1024); allocate(900): 900 + 16 = 916 rounds up to a target of
        // 1024, which would consume the only free block, so preserve-one
        // refuses it and the arena is left untouched.
        let mut v = Vlad::init(1024).unwrap();
        assert!(v.allocate(900).is_none());
        assert_blocks(&v, &[(0, 1024, false)]);
        check_invariants(&v);
    }

    #[test]
    fn tiny_init_is_forced_up_to_the_minimum_then_oversize_request_fails() {
        // init(256) is forced up to the 512-byte floor; allocate(1000) is
        // oversize (1000 + 16 > 512) and returns null.
        let mut v = Vlad::init(256).unwrap();
        assert_eq!(v.arena_size(), 512);
        assert!(v.allocate(1000).is_none());
        assert_blocks(&v, &[(0, 512, false)]);
        check_invariants(&v);
    }

    #[test]
    fn alloc_then_free_restores_single_free_block() {
        let mut v = Vlad::init(1024).unwrap();
        let p = v.allocate(100).unwrap();
        v.free(p);
        check_invariants(&v);
        assert_eq!(v.free_offsets(), vec![0]);
        assert_eq!(v.header_at(0).size, 1024);
    }

    #[test]
    fn oversize_request_returns_none() {
        let mut v = Vlad::init(512).unwrap();
        assert!(v.allocate(10_000).is_none());
    }

    #[test]
    fn preserve_one_refuses_an_exact_fit_on_the_sole_free_block() {
        let mut v = Vlad::init(512).unwrap();
        // the only free block is the whole 512-byte arena; requesting
        // exactly 512 - HEADER_SIZE bytes would consume it whole, leaving
        // the ring empty, so the preserve-one rule refuses it.
        assert!(v.allocate(512 - HEADER_SIZE).is_none());
        check_invariants(&v);
    }

    #[test]
    fn preserve_one_allows_a_split_that_leaves_a_buddy_behind() {
        let mut v = Vlad::init(512).unwrap();
        // requesting less than the whole arena forces a split, which leaves
        // a free buddy behind, so this is allowed even though the sole
        // block was consulted.
        let p = v.allocate(64).unwrap();
        assert!(v.free_offsets().len() >= 1);
        v.free(p);
        check_invariants(&v);
    }

    #[test]
    fn two_allocations_then_both_freed_coalesce_fully() {
        let mut v = Vlad::init(1024).unwrap();
        let a = v.allocate(100).unwrap();
        let b = v.allocate(100).unwrap();
        check_invariants(&v);
        v.free(a);
        check_invariants(&v);
        v.free(b);
        check_invariants(&v);
        assert_eq!(v.free_offsets(), vec![0]);
        assert_eq!(v.header_at(0).size, 1024);
    }

    #[test]
    fn freeing_out_of_order_still_coalesces() {
        let mut v = Vlad::init(2048).unwrap();
        let a = v.allocate(200).unwrap();
        let b = v.allocate(200).unwrap();
        let c = v.allocate(200).unwrap();
        v.free(b);
        v.free(a);
        v.free(c);
        check_invariants(&v);
        assert_eq!(v.free_offsets(), vec![0]);
        assert_eq!(v.header_at(0).size, 2048);
    }

    #[test]
    fn round_trip_holds_regardless_of_free_order() {
        // allocating a fixed set of same-size blocks and freeing them in
        // any order must return a fresh arena to a single free block of
        // size `S`.
        let orders: [&[usize]; 3] = [&[0, 1, 2, 3], &[3, 2, 1, 0], &[1, 3, 0, 2]];

        for order in orders {
            let mut v = Vlad::init(2048).unwrap();
            let ptrs: Vec<_> = (0..4).map(|_| v.allocate(200).unwrap()).collect();
            check_invariants(&v);

            for &i in order {
                v.free(ptrs[i]);
                check_invariants(&v);
            }

            assert_eq!(v.free_offsets(), vec![0]);
            assert_eq!(v.header_at(0).size, 2048);
        }
    }

    #[test]
    fn best_fit_prefers_smaller_adequate_block_over_larger() {
        let mut v = Vlad::init(4096).unwrap();
        // carving a 100-byte (128-byte block) allocation out of the whole
        // arena leaves free blocks of every smaller power of two behind:
        // 128, 256, 512, 1024, 2048. Consuming the 2048 one leaves
        // {128, 256, 512, 1024} simultaneously free and not mutual buddies.
        let a = v.allocate(100).unwrap();
        let spacer = v.allocate(2000).unwrap();
        let _ = spacer;
        check_invariants(&v);

        // a second 100-byte request must pick the smallest qualifying free
        // block (128 @ offset 128), not the larger 256/512/1024 candidates
        // that also satisfy the size requirement.
        let b = v.allocate(100).unwrap();
        assert_eq!(v.arena.header_offset_of(b).unwrap(), 128);
        assert_eq!(v.arena.header_offset_of(a).unwrap(), 0);
        check_invariants(&v);
    }
}
