//! Read-only ANSI 2D rendering of the arena: a read-only collaborator that
//! walks the arena by block size rather than the free ring and
//! Z-order-interleaves an offset into a `32 x 16` grid coordinate. Green
//! marks free blocks, blue marks allocated ones.

use std::fmt::Write as _;
use std::ptr::NonNull;

use crate::allocator::Vlad;
use crate::config::{MAX_VISUALIZER_SIZE, VISUALIZER_HEIGHT, VISUALIZER_LABEL_COUNT, VISUALIZER_WIDTH};

const BG_FREE: &str = "\x1b[42m";
const BG_ALLOC: &str = "\x1b[44m";
const FG_FREE: &str = "\x1b[32m";
const FG_ALLOC: &str = "\x1b[34m";
const RESET: &str = "\x1b[0m";

#[derive(Clone, Copy)]
struct Point {
    x: usize,
    y: usize,
}

/// Converts a byte offset into the arena into a grid coordinate, walking
/// the offset's bits alternately between the X and Y axes (the same
/// interleaving `offset_to_point` in the original implementation performs).
fn offset_to_point(offset: usize, size: usize, is_end: bool) -> Point {
    let mut pot = [VISUALIZER_WIDTH, VISUALIZER_HEIGHT];
    let mut crd = [0isize, 0isize];
    let mut sign = 1isize;
    let mut in_y = 0usize;
    let mut curr = size >> 1;
    let offset = if is_end {
        crd = [VISUALIZER_WIDTH as isize, VISUALIZER_HEIGHT as isize];
        sign = -1;
        size - offset
    } else {
        offset
    };

    while curr != 0 {
        pot[in_y] >>= 1;
        if curr & offset != 0 {
            crd[in_y] += pot[in_y] as isize * sign;
        }
        in_y = 1 - in_y;
        curr >>= 1;
    }

    Point { x: crd[0] as usize, y: crd[1] as usize }
}

/// One rendered grid cell: an ANSI-colored two-character string.
type Grid = Vec<Vec<String>>;

fn fill_block(grid: &mut Grid, offset: usize, size: usize, arena_size: usize, is_free: bool, label: &str) {
    let start = offset_to_point(offset, arena_size, false);
    let end = offset_to_point(offset + size, arena_size, true);
    let color = if is_free { BG_FREE } else { BG_ALLOC };

    for y in start.y..end.y {
        for x in start.x..end.x {
            let text = if x == start.x && y == start.y {
                format!("|{label}")
            } else if x == start.x && y == end.y - 1 {
                "|_".to_string()
            } else if y == end.y - 1 {
                "__".to_string()
            } else if x == start.x {
                "| ".to_string()
            } else {
                "  ".to_string()
            };
            grid[y][x] = format!("{color}{text}{RESET}");
        }
    }
}

/// Renders `v`'s current arena as the ANSI grid plus size tables. `labels`
/// names up to 26 previously-allocated payload pointers, labeled
/// `'a'..='z'` in the order given; any beyond 26 are silently ignored.
///
/// Only correct for arenas up to `MAX_VISUALIZER_SIZE` (16 MiB): the grid
/// has a fixed 32x16 resolution, so larger arenas still render but with
/// coarser-than-single-block cells.
pub fn reveal(v: &Vlad, labels: &[NonNull<u8>]) -> String {
    let arena_size = v.arena_size();
    debug_assert!(
        arena_size <= MAX_VISUALIZER_SIZE,
        "reveal() only renders correctly for arenas up to {MAX_VISUALIZER_SIZE} bytes, got {arena_size}",
    );
    let mut grid: Grid = vec![vec![String::new(); VISUALIZER_WIDTH]; VISUALIZER_HEIGHT];

    let mut free_sizes = Vec::new();
    let mut offset = 0usize;
    let mut free_label = 1usize;
    while offset < arena_size {
        let h = v.header_at(offset as u32);
        if h.is_free() {
            free_sizes.push(format!("{free_label}) {} bytes", h.size));
            fill_block(&mut grid, offset, h.size as usize, arena_size, true, &free_label.to_string());
            free_label += 1;
        }
        offset += h.size as usize;
    }

    let mut alloc_sizes = Vec::new();
    for (i, &ptr) in labels.iter().take(VISUALIZER_LABEL_COUNT).enumerate() {
        if let Some(offset) = v.offset_of(ptr) {
            let h = v.header_at(offset);
            let letter = (b'a' + i as u8) as char;
            alloc_sizes.push(format!("{letter}) {} bytes", h.size));
            fill_block(&mut grid, offset as usize, h.size as usize, arena_size, false, &letter.to_string());
        }
    }

    let mut out = String::new();
    for row in &grid {
        for cell in row {
            if cell.is_empty() {
                out.push_str("  ");
            } else {
                out.push_str(cell);
            }
        }
        out.push('\n');
    }

    write!(out, "{FG_FREE}{:<32}{RESET}", "Free").unwrap();
    if !alloc_sizes.is_empty() {
        writeln!(out, "{FG_ALLOC}Allocated{RESET}").unwrap();
    } else {
        out.push('\n');
    }

    let rows = free_sizes.len().max(alloc_sizes.len());
    for i in 0..rows {
        let free = free_sizes.get(i).map(String::as_str).unwrap_or("");
        let alloc = alloc_sizes.get(i).map(String::as_str).unwrap_or("");
        writeln!(out, "{free:<32}{alloc}").unwrap();
    }

    out
}
