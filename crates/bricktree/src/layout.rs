//! Brick layout and cell addressing.
//!
//! A brick is an N³ block of cells with N a power of two in `[2, 64]`, so
//! all addressing runs on shifts and masks.
//!
//! # Memory layout
//!
//! ```text
//! index = x << (2·shift) | y << shift | z
//!       = (x·N + y)·N + z
//! ```
//!
//! X is the major axis, Z the minor: sequential Z values are adjacent in
//! memory, so a Z-column of a brick is one contiguous run.
//!
//! # Levels
//!
//! Level 0 is the root grid (N cells per axis across the whole block);
//! level `depth − 1` is the finest grid (`N^depth` cells per axis). Each
//! level refines every cell of the previous one into N³ children.

use glam::UVec3;

use crate::error::{Error, Result};

/// Cell addressing for one brick size.
///
/// Copy-sized handle passed by value, like a pair of shift constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrickLayout {
  /// log2 of the brick size.
  shift: u32,
}

impl BrickLayout {
  /// Creates a layout for `brick_size` cells per axis.
  ///
  /// Sizes outside {2, 4, 8, 16, 32, 64} are rejected.
  pub fn new(brick_size: u32) -> Result<Self> {
    if !brick_size.is_power_of_two() || !(2..=64).contains(&brick_size) {
      return Err(Error::UnsupportedBrickSize(brick_size));
    }
    Ok(Self {
      shift: brick_size.trailing_zeros(),
    })
  }

  /// Cells per axis (N).
  #[inline]
  pub const fn size(&self) -> u32 {
    1 << self.shift
  }

  /// Total cells in one brick (N³).
  #[inline]
  pub const fn cells(&self) -> usize {
    1 << (3 * self.shift)
  }

  /// log2 of the brick size.
  #[inline]
  pub const fn shift(&self) -> u32 {
    self.shift
  }

  /// Converts an in-brick cell coordinate to its linear index.
  #[inline]
  pub const fn cell_index(&self, cell: UVec3) -> usize {
    (((cell.x as usize) << self.shift | cell.y as usize) << self.shift) | cell.z as usize
  }

  /// Converts a linear cell index back to its in-brick coordinate.
  #[inline]
  pub const fn cell_coord(&self, index: usize) -> UVec3 {
    let mask = (1 << self.shift) - 1;
    UVec3::new(
      (index >> (2 * self.shift)) as u32,
      ((index >> self.shift) & mask) as u32,
      (index & mask) as u32,
    )
  }

  /// Cell within a brick for a grid coordinate, where the brick's cells
  /// each span `N^levels_below` grid units per axis.
  ///
  /// During descent from the root of a depth-D tree with a finest-grid
  /// coordinate, step `l` uses `levels_below = D − 1 − l`; the final step
  /// uses 0 (cell = coord masked to the brick).
  #[inline]
  pub const fn cell_of(&self, coord: UVec3, levels_below: u32) -> UVec3 {
    let mask = (1 << self.shift) - 1;
    let k = self.shift * levels_below;
    UVec3::new(
      (coord.x >> k) & mask,
      (coord.y >> k) & mask,
      (coord.z >> k) & mask,
    )
  }

  /// Cells per axis covered by a whole tree of the given depth (N^depth).
  #[inline]
  pub const fn block_width(&self, depth: u32) -> u64 {
    1 << (self.shift * depth)
  }

  /// Cells per axis of the level-`level` grid (N^(level+1)).
  #[inline]
  pub const fn level_width(&self, level: u32) -> u64 {
    self.block_width(level + 1)
  }

  /// Deepest tree whose finest-grid coordinates still fit in 32 bits.
  #[inline]
  pub const fn max_depth(&self) -> u32 {
    31 / self.shift + 1
  }

  /// Smallest depth whose block width covers `extent` cells, clamped to
  /// [1, max_depth].
  pub fn depth_for(&self, extent: u32) -> u32 {
    let mut depth = 1;
    while depth < self.max_depth() && self.block_width(depth) < extent as u64 {
      depth += 1;
    }
    depth
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_bad_sizes() {
    for bad in [0, 1, 3, 5, 7, 24, 128] {
      assert!(BrickLayout::new(bad).is_err(), "size {bad} should fail");
    }
    for good in [2, 4, 8, 16, 32, 64] {
      assert_eq!(BrickLayout::new(good).unwrap().size(), good);
    }
  }

  #[test]
  fn index_round_trip() {
    let layout = BrickLayout::new(4).unwrap();
    assert_eq!(layout.cells(), 64);
    for index in 0..layout.cells() {
      let coord = layout.cell_coord(index);
      assert_eq!(layout.cell_index(coord), index);
    }
    // X major, Z minor.
    assert_eq!(layout.cell_index(UVec3::new(1, 0, 0)), 16);
    assert_eq!(layout.cell_index(UVec3::new(0, 1, 0)), 4);
    assert_eq!(layout.cell_index(UVec3::new(0, 0, 1)), 1);
  }

  #[test]
  fn descent_cells() {
    let layout = BrickLayout::new(4).unwrap();
    // Depth-2 tree, finest grid is 16 per axis: coordinate 13 sits in root
    // cell 3, leaf cell 1.
    let coord = UVec3::splat(13);
    assert_eq!(layout.cell_of(coord, 1), UVec3::splat(3));
    assert_eq!(layout.cell_of(coord, 0), UVec3::splat(1));
  }

  #[test]
  fn widths_and_depths() {
    let layout = BrickLayout::new(4).unwrap();
    assert_eq!(layout.block_width(3), 64);
    assert_eq!(layout.level_width(0), 4);
    assert_eq!(layout.level_width(2), 64);
    assert_eq!(layout.depth_for(1), 1);
    assert_eq!(layout.depth_for(4), 1);
    assert_eq!(layout.depth_for(5), 2);
    assert_eq!(layout.depth_for(64), 3);
    assert_eq!(layout.depth_for(65), 4);

    let wide = BrickLayout::new(64).unwrap();
    assert_eq!(wide.max_depth(), 6);
    assert_eq!(wide.depth_for(u32::MAX), 6);
  }
}
