//! Grid of trees covering one large domain.
//!
//! A forest splits the global voxel grid into blocks of `N^depth` cells
//! per axis, one tree per block. Blocks are independent: they build in
//! parallel, serialize to separate blobs, and stream separately. The grid
//! is dense at runtime; blocks that overhang the domain edge record the
//! overlap in their tree's `valid_size`.

use glam::{IVec3, U64Vec3, UVec3, Vec3};

use crate::layout::BrickLayout;
use crate::source::grid_index;
use crate::tree::Tree;
use crate::types::ValueRange;

#[derive(Debug)]
pub struct Forest {
  layout: BrickLayout,
  depth: u32,
  /// Root grid extent in trees per axis.
  grid: UVec3,
  /// Finest cells per axis under one tree.
  block_width: u64,
  /// Extent of the valid global domain.
  valid_size: UVec3,
  average: f32,
  range: ValueRange,
  /// One tree per grid cell, X-major Z-minor linear order.
  trees: Vec<Tree>,
}

impl Forest {
  pub(crate) fn new(
    layout: BrickLayout,
    depth: u32,
    grid: UVec3,
    valid_size: UVec3,
    average: f32,
    range: ValueRange,
    trees: Vec<Tree>,
  ) -> Self {
    debug_assert_eq!(
      trees.len(),
      grid.x as usize * grid.y as usize * grid.z as usize,
    );
    Self {
      layout,
      depth,
      grid,
      block_width: layout.block_width(depth),
      valid_size,
      average,
      range,
      trees,
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

  /// Trees per axis.
  #[inline]
  pub fn grid_size(&self) -> UVec3 {
    self.grid
  }

  /// Finest cells per axis under one tree (`N^depth`).
  #[inline]
  pub fn block_width(&self) -> u64 {
    self.block_width
  }

  #[inline]
  pub fn valid_size(&self) -> UVec3 {
    self.valid_size
  }

  /// Valid-voxel-weighted mean over the whole domain.
  #[inline]
  pub fn average(&self) -> f32 {
    self.average
  }

  #[inline]
  pub fn range(&self) -> ValueRange {
    self.range
  }

  pub fn tree_count(&self) -> usize {
    self.trees.len()
  }

  pub fn trees(&self) -> &[Tree] {
    &self.trees
  }

  /// Linear index of a grid cell.
  #[inline]
  pub fn cell_index(&self, cell: UVec3) -> usize {
    grid_index(self.grid, cell)
  }

  /// Tree owning a grid cell.
  #[inline]
  pub fn tree(&self, cell: UVec3) -> &Tree {
    &self.trees[self.cell_index(cell)]
  }

  /// Splits a global coordinate into its grid cell and in-block remainder.
  #[inline]
  pub(crate) fn route(&self, coord: UVec3) -> (UVec3, UVec3) {
    let global = coord.as_u64vec3();
    let cell = global / U64Vec3::splat(self.block_width);
    let local = global % U64Vec3::splat(self.block_width);
    (cell.as_uvec3(), local.as_uvec3())
  }

  /// Value at a global voxel coordinate, clamped into the valid domain.
  pub fn find_value(&self, coord: IVec3) -> f32 {
    let max = (self.valid_size.as_ivec3() - IVec3::ONE).max(IVec3::ZERO);
    let coord = coord.clamp(IVec3::ZERO, max).as_uvec3();
    let (cell, local) = self.route(coord);
    self.tree(cell).find_value(local.as_ivec3())
  }

  /// Trilinear sample at a global voxel-space position.
  ///
  /// The 8 corner voxels resolve independently, so a sample near a block
  /// boundary blends values from neighboring trees.
  pub fn sample(&self, pos: Vec3) -> f32 {
    crate::sampler::sample(pos, |coord| self.find_value(coord))
  }
}

#[cfg(test)]
#[path = "forest_test.rs"]
mod forest_test;
