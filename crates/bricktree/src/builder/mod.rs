//! Tree construction.
//!
//! [`TreeBuilder`] is the incremental core: `set` writes one cell at one
//! level, fetch-or-creating every brick on the path from the root. The
//! dense builder ([`build_tree`]) and the forest partitioner drive it; it
//! can also be fed directly when voxels arrive out of order (simulation
//! output, network streams).
//!
//! A builder never decides statistics. Whoever drives it knows the domain
//! and supplies [`TreeStats`] at `finish` time; only the dense driver
//! computes them itself during recursion.

use std::sync::Mutex;

use glam::UVec3;

use crate::layout::BrickLayout;
use crate::tree::{Tree, TreeIndex};
use crate::types::{BrickId, ValueRange};

mod dense;
pub mod forest;

pub use dense::{build_tree, BuildConfig, Threshold};
pub use forest::{build_forest, ForestBuilder, ForestConfig, MAX_ROOT_CELLS};

/// Whole-tree statistics recorded next to the brick arenas.
#[derive(Clone, Copy, Debug)]
pub struct TreeStats {
  /// Coverage-weighted mean over the valid domain.
  pub average: f32,
  /// Min/max over the valid domain.
  pub range: ValueRange,
  /// Extent of the valid (non-padding) domain within the block.
  pub valid_size: UVec3,
}

/// Brick arenas under construction.
#[derive(Debug, Default)]
struct BuilderState {
  values: Vec<f32>,
  children: Vec<BrickId>,
  index_of: Vec<BrickId>,
}

impl BuilderState {
  /// Index brick of `brick`, created on first use.
  fn fetch_index_brick(&mut self, brick: BrickId, cells: usize) -> BrickId {
    let existing = self.index_of[brick.index()];
    if existing.is_valid() {
      return existing;
    }
    let id = BrickId::from_index(self.children.len() / cells);
    self.children.resize(self.children.len() + cells, BrickId::INVALID);
    self.index_of[brick.index()] = id;
    id
  }

  /// Child value brick in `slot` of `index_brick`, created on first use.
  fn fetch_child(&mut self, index_brick: BrickId, slot: usize, cells: usize) -> BrickId {
    let at = index_brick.index() * cells + slot;
    let existing = self.children[at];
    if existing.is_valid() {
      return existing;
    }
    let id = BrickId::from_index(self.index_of.len());
    self.values.resize(self.values.len() + cells, 0.0);
    self.index_of.push(BrickId::INVALID);
    self.children[at] = id;
    id
  }
}

/// Incremental, thread-shareable builder for one tree.
///
/// All mutation runs under one internal lock, so a builder can be shared
/// by reference (or `Arc`) across worker threads. Writes from different
/// threads land in insertion order of the lock; the last write to a cell
/// wins.
#[derive(Debug)]
pub struct TreeBuilder {
  layout: BrickLayout,
  depth: u32,
  state: Mutex<BuilderState>,
}

impl TreeBuilder {
  /// Creates a builder holding only the zeroed root brick.
  pub fn new(layout: BrickLayout, depth: u32) -> Self {
    debug_assert!(depth >= 1 && depth <= layout.max_depth());
    let state = BuilderState {
      values: vec![0.0; layout.cells()],
      children: Vec::new(),
      index_of: vec![BrickId::INVALID],
    };
    Self {
      layout,
      depth,
      state: Mutex::new(state),
    }
  }

  #[inline]
  pub fn layout(&self) -> BrickLayout {
    self.layout
  }

  #[inline]
  pub fn depth(&self) -> u32 {
    self.depth
  }

  /// Writes one cell of the level-`level` grid.
  ///
  /// `coord` addresses the level grid (`N^(level+1)` cells per axis);
  /// level 0 writes the root's own cells, `depth - 1` the finest grid.
  /// Every missing brick between the root and the target is created
  /// zero-filled on the way down.
  pub fn set(&self, coord: UVec3, level: u32, value: f32) {
    debug_assert!(level < self.depth);
    debug_assert!(
      (coord.as_u64vec3().cmplt(glam::U64Vec3::splat(self.layout.level_width(level)))).all(),
      "coord {coord} outside level {level} grid",
    );

    let cells = self.layout.cells();
    let mut state = self.state.lock().unwrap();

    let mut brick = BrickId::ROOT;
    for step in 0..level {
      let cell = self.layout.cell_index(self.layout.cell_of(coord, level - step));
      let index_brick = state.fetch_index_brick(brick, cells);
      brick = state.fetch_child(index_brick, cell, cells);
    }

    let cell = self.layout.cell_index(self.layout.cell_of(coord, 0));
    state.values[brick.index() * cells + cell] = value;
  }

  /// Fills the root's cells covering `valid_size` with one value.
  ///
  /// Used when a whole block collapses to its average: the root brick must
  /// still exist and answer queries faithfully.
  pub fn fill_root(&self, valid_size: UVec3, value: f32) {
    let cell_span = self.layout.block_width(self.depth - 1);
    let n = self.layout.size();
    for x in 0..n {
      for y in 0..n {
        for z in 0..n {
          let cell = UVec3::new(x, y, z);
          let covered = (cell.as_u64vec3() * cell_span)
            .cmplt(valid_size.as_u64vec3())
            .all();
          if covered {
            self.set(cell, 0, value);
          }
        }
      }
    }
  }

  /// Bricks allocated so far as `(value_bricks, index_bricks)`.
  pub fn brick_counts(&self) -> (usize, usize) {
    let state = self.state.lock().unwrap();
    (state.index_of.len(), state.children.len() / self.layout.cells())
  }

  /// Seals the arenas into an immutable [`Tree`].
  ///
  /// Drains the builder; it must not be used afterwards.
  pub fn finish(&self, stats: TreeStats) -> Tree {
    let drained = {
      let mut state = self.state.lock().unwrap();
      std::mem::take(&mut *state)
    };
    let index = TreeIndex::new(self.layout, self.depth, drained.children, drained.index_of);
    Tree::new(index, drained.values, stats.average, stats.range, stats.valid_size)
  }
}
