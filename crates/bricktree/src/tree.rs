//! Brick tree topology and the fully-loaded tree.
//!
//! A tree is three flat arenas indexed by [`BrickId`]:
//!
//! ```text
//! values:   [brick 0 cells][brick 1 cells]...   N³ f32 per value brick
//! children: [brick 0 cells][brick 1 cells]...   N³ BrickId per index brick
//! index_of: one BrickId per value brick         its index brick, or INVALID
//! ```
//!
//! Value brick 0 is the root and always exists. A value brick whose
//! `index_of` entry is INVALID is a leaf of the pruned hierarchy: every
//! query into its footprint resolves to one of its own cells.
//!
//! [`TreeIndex`] carries only the topology (no cell values); the streaming
//! runtime shares it so descent is written once.

use glam::{IVec3, UVec3, Vec3};

use crate::layout::BrickLayout;
use crate::types::{BrickId, ValueRange};

/// Where a descent stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescentHit {
  /// Value brick the query resolves into.
  pub brick: BrickId,
  /// Linear cell of `brick` covering the query coordinate.
  pub cell: usize,
  /// Level of `brick` (0 = root, `depth - 1` = finest).
  pub level: u32,
  /// Value brick of the parent, INVALID when `brick` is the root.
  pub parent: BrickId,
  /// Linear cell of `parent` that `brick` refines.
  pub parent_cell: usize,
}

/// Topology of one tree: layout, depth, and the child/index arenas.
#[derive(Clone, Debug)]
pub struct TreeIndex {
  layout: BrickLayout,
  depth: u32,
  /// Index brick arena, N³ child ids per brick.
  children: Vec<BrickId>,
  /// Per value brick: its index brick, or INVALID for pruned leaves.
  index_of: Vec<BrickId>,
}

impl TreeIndex {
  pub(crate) fn new(
    layout: BrickLayout,
    depth: u32,
    children: Vec<BrickId>,
    index_of: Vec<BrickId>,
  ) -> Self {
    debug_assert!(depth >= 1 && depth <= layout.max_depth());
    debug_assert_eq!(children.len() % layout.cells(), 0);
    debug_assert!(!index_of.is_empty(), "the root brick always exists");
    Self {
      layout,
      depth,
      children,
      index_of,
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

  pub fn value_brick_count(&self) -> usize {
    self.index_of.len()
  }

  pub fn index_brick_count(&self) -> usize {
    self.children.len() / self.layout.cells()
  }

  pub(crate) fn children(&self) -> &[BrickId] {
    &self.children
  }

  pub(crate) fn index_of(&self) -> &[BrickId] {
    &self.index_of
  }

  /// Index brick refining `value_brick`, or INVALID.
  #[inline]
  pub fn index_brick_of(&self, value_brick: BrickId) -> BrickId {
    self.index_of[value_brick.index()]
  }

  /// Child id cells of one index brick.
  #[inline]
  pub fn index_cells(&self, index_brick: BrickId) -> &[BrickId] {
    let cells = self.layout.cells();
    let start = index_brick.index() * cells;
    &self.children[start..start + cells]
  }

  /// Descends from the root toward the finest level.
  ///
  /// `coord` addresses the finest grid (`N^depth` cells per axis) and must
  /// already be in range. Descent stops at the finest level, at a brick
  /// without an index brick, or at an INVALID child slot; the hit names
  /// the stopping brick and its cell covering `coord`.
  pub fn descend(&self, coord: UVec3) -> DescentHit {
    let mut brick = BrickId::ROOT;
    let mut parent = BrickId::INVALID;
    let mut parent_cell = 0;
    let mut level = 0;
    loop {
      let levels_below = self.depth - 1 - level;
      let cell = self.layout.cell_index(self.layout.cell_of(coord, levels_below));
      if levels_below == 0 {
        return DescentHit {
          brick,
          cell,
          level,
          parent,
          parent_cell,
        };
      }
      let index_brick = self.index_of[brick.index()];
      if !index_brick.is_valid() {
        return DescentHit {
          brick,
          cell,
          level,
          parent,
          parent_cell,
        };
      }
      let child = self.index_cells(index_brick)[cell];
      if !child.is_valid() {
        return DescentHit {
          brick,
          cell,
          level,
          parent,
          parent_cell,
        };
      }
      parent = brick;
      parent_cell = cell;
      brick = child;
      level += 1;
    }
  }
}

/// Immutable brick tree with all value bricks resident in memory.
#[derive(Debug)]
pub struct Tree {
  index: TreeIndex,
  /// Value brick arena, N³ f32 per brick.
  values: Vec<f32>,
  average: f32,
  range: ValueRange,
  /// Extent of the valid (non-padding) domain within the block.
  valid_size: UVec3,
}

impl Tree {
  pub(crate) fn new(
    index: TreeIndex,
    values: Vec<f32>,
    average: f32,
    range: ValueRange,
    valid_size: UVec3,
  ) -> Self {
    debug_assert_eq!(values.len(), index.value_brick_count() * index.layout().cells());
    Self {
      index,
      values,
      average,
      range,
      valid_size,
    }
  }

  #[inline]
  pub fn index(&self) -> &TreeIndex {
    &self.index
  }

  #[inline]
  pub fn layout(&self) -> BrickLayout {
    self.index.layout
  }

  #[inline]
  pub fn depth(&self) -> u32 {
    self.index.depth
  }

  /// Coverage-weighted mean of the whole valid domain.
  #[inline]
  pub fn average(&self) -> f32 {
    self.average
  }

  #[inline]
  pub fn range(&self) -> ValueRange {
    self.range
  }

  #[inline]
  pub fn valid_size(&self) -> UVec3 {
    self.valid_size
  }

  pub fn value_brick_count(&self) -> usize {
    self.index.value_brick_count()
  }

  pub fn index_brick_count(&self) -> usize {
    self.index.index_brick_count()
  }

  /// Cells of one value brick.
  #[inline]
  pub fn value_brick(&self, id: BrickId) -> &[f32] {
    let cells = self.index.layout.cells();
    let start = id.index() * cells;
    &self.values[start..start + cells]
  }

  pub(crate) fn values(&self) -> &[f32] {
    &self.values
  }

  /// Value at a voxel coordinate, clamped into the valid domain.
  ///
  /// Never fails: out-of-range queries read the nearest valid voxel, and a
  /// pruned region resolves to the coarser brick covering it.
  pub fn find_value(&self, coord: IVec3) -> f32 {
    let max = (self.valid_size.as_ivec3() - IVec3::ONE).max(IVec3::ZERO);
    let coord = coord.clamp(IVec3::ZERO, max).as_uvec3();
    let hit = self.index.descend(coord);
    self.value_brick(hit.brick)[hit.cell]
  }

  /// Trilinear sample at a voxel-space position.
  pub fn sample(&self, pos: Vec3) -> f32 {
    crate::sampler::sample(pos, |coord| self.find_value(coord))
  }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
