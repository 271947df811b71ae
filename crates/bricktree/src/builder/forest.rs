//! Forest partitioning and parallel builds.
//!
//! A forest build splits the domain into `N^depth`-wide blocks and builds
//! one tree per block. Blocks never share bricks, so [`build_forest`] runs
//! them as independent rayon tasks, and [`ForestBuilder`] lets concurrent
//! producers feed different blocks without contending on one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glam::{U64Vec3, UVec3};
use rayon::prelude::*;
use tracing::info;
use web_time::Instant;

use crate::builder::dense::build_block;
use crate::builder::{BuildConfig, TreeBuilder, TreeStats};
use crate::error::{Error, Result};
use crate::forest::Forest;
use crate::layout::BrickLayout;
use crate::source::{grid_index, DenseSource, WindowSource};
use crate::tree::Tree;
use crate::types::ValueRange;

/// Hard cap on root grid cells, checked before any build work starts.
pub const MAX_ROOT_CELLS: u64 = 1 << 20;

/// Trees per axis for a domain of `size`, given the per-tree block width.
fn grid_for(size: UVec3, block_width: u64) -> UVec3 {
  let size = size.as_u64vec3();
  let grid = (size + U64Vec3::splat(block_width - 1)) / U64Vec3::splat(block_width);
  grid.max(U64Vec3::ONE).as_uvec3()
}

fn check_capacity(grid: UVec3) -> Result<()> {
  let cells = grid.x as u64 * grid.y as u64 * grid.z as u64;
  if cells > MAX_ROOT_CELLS {
    return Err(Error::RootGridTooLarge {
      cells,
      max: MAX_ROOT_CELLS,
    });
  }
  Ok(())
}

/// Valid extent of one block: its overlap with the global domain.
fn block_valid_size(cell: UVec3, block_width: u64, size: UVec3) -> UVec3 {
  let begin = cell.as_u64vec3() * block_width;
  let remain = size.as_u64vec3() - begin.min(size.as_u64vec3());
  remain.min(U64Vec3::splat(block_width)).as_uvec3()
}

/// Builds a forest from a dense source, one rayon task per block.
///
/// The threshold resolves once against the whole source (after the grid
/// passes the capacity check), so pruning is consistent across blocks.
/// With `depth: None` the derived depth covers the entire domain and the
/// forest collapses to a single tree.
pub fn build_forest<S: DenseSource>(source: &S, config: &BuildConfig) -> Result<Forest> {
  let size = source.size();
  if size.min_element() == 0 {
    return Err(Error::EmptyDomain { extent: size });
  }
  let (layout, depth) = config.resolve(size.max_element())?;
  let block_width = layout.block_width(depth);
  let grid = grid_for(size, block_width);
  check_capacity(grid)?;
  let threshold = config.threshold.resolve(source);

  let started = Instant::now();
  let cells: Vec<UVec3> = {
    let mut cells = Vec::with_capacity(grid.x as usize * grid.y as usize * grid.z as usize);
    for x in 0..grid.x {
      for y in 0..grid.y {
        for z in 0..grid.z {
          cells.push(UVec3::new(x, y, z));
        }
      }
    }
    cells
  };

  let trees: Vec<Tree> = cells
    .into_par_iter()
    .map(|cell| {
      let begin = (cell.as_u64vec3() * block_width).as_uvec3();
      let window = block_valid_size(cell, block_width, size);
      let view = WindowSource::new(source, begin, window);
      build_block(&view, layout, depth, threshold)
    })
    .collect();

  let (average, range) = merge_stats(&trees);
  info!(
    "Built forest {}x{}x{}: {} trees, {} value bricks in {:.1}ms",
    grid.x,
    grid.y,
    grid.z,
    trees.len(),
    trees.iter().map(Tree::value_brick_count).sum::<usize>(),
    started.elapsed().as_secs_f64() * 1e3,
  );

  Ok(Forest::new(layout, depth, grid, size, average, range, trees))
}

/// Valid-voxel-weighted average and merged range over built trees.
fn merge_stats(trees: &[Tree]) -> (f32, ValueRange) {
  let mut sum = 0.0f64;
  let mut weight = 0.0f64;
  let mut range = ValueRange::empty();
  for tree in trees {
    let valid = tree.valid_size();
    let voxels = valid.x as f64 * valid.y as f64 * valid.z as f64;
    if voxels > 0.0 {
      sum += tree.average() as f64 * voxels;
      weight += voxels;
      range.merge(tree.range());
    }
  }
  let average = if weight > 0.0 { (sum / weight) as f32 } else { 0.0 };
  (average, range)
}

/// Configuration for an incrementally fed forest.
#[derive(Clone, Copy, Debug)]
pub struct ForestConfig {
  /// Cells per brick axis, a power of two in `[2, 64]`.
  pub brick_size: u32,
  /// Depth of every tree in the forest.
  pub depth: u32,
  /// Global valid domain extent.
  pub size: UVec3,
}

impl ForestConfig {
  pub fn new(size: UVec3) -> Self {
    Self {
      brick_size: 8,
      depth: 2,
      size,
    }
  }

  pub fn with_brick_size(mut self, brick_size: u32) -> Self {
    self.brick_size = brick_size;
    self
  }

  pub fn with_depth(mut self, depth: u32) -> Self {
    self.depth = depth;
    self
  }
}

/// Incremental forest builder for out-of-order voxel streams.
///
/// Blocks are allocated lazily on first touch and held in a keyed map, so
/// a sparse stream only pays for the blocks it visits and cell handles
/// stay valid while other blocks appear. The map lock is separate from
/// each block's own builder lock: two threads writing different blocks
/// only contend on the brief handle lookup.
#[derive(Debug)]
pub struct ForestBuilder {
  layout: BrickLayout,
  depth: u32,
  size: UVec3,
  grid: UVec3,
  block_width: u64,
  blocks: Mutex<HashMap<UVec3, Arc<TreeBuilder>>>,
}

impl ForestBuilder {
  pub fn new(config: &ForestConfig) -> Result<Self> {
    if config.size.min_element() == 0 {
      return Err(Error::EmptyDomain { extent: config.size });
    }
    let layout = BrickLayout::new(config.brick_size)?;
    let depth = config.depth.clamp(1, layout.max_depth());
    let block_width = layout.block_width(depth);
    let grid = grid_for(config.size, block_width);
    check_capacity(grid)?;
    Ok(Self {
      layout,
      depth,
      size: config.size,
      grid,
      block_width,
      blocks: Mutex::new(HashMap::new()),
    })
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

  /// Blocks touched so far.
  pub fn touched_blocks(&self) -> usize {
    self.blocks.lock().unwrap().len()
  }

  /// Builder of the block at a grid cell, created on first touch.
  pub fn block(&self, cell: UVec3) -> Arc<TreeBuilder> {
    debug_assert!(cell.cmplt(self.grid).all(), "cell {cell} outside grid {}", self.grid);
    let mut blocks = self.blocks.lock().unwrap();
    blocks
      .entry(cell)
      .or_insert_with(|| Arc::new(TreeBuilder::new(self.layout, self.depth)))
      .clone()
  }

  /// Writes one cell of the global level-`level` grid.
  ///
  /// The coordinate is split into the owning block and its in-block
  /// remainder; the write lands in that block's builder.
  pub fn set(&self, coord: UVec3, level: u32, value: f32) {
    let width = self.layout.level_width(level);
    let global = coord.as_u64vec3();
    let cell = (global / U64Vec3::splat(width)).as_uvec3();
    let local = (global % U64Vec3::splat(width)).as_uvec3();
    self.block(cell).set(local, level, value);
  }

  /// Seals every block into an immutable [`Forest`].
  ///
  /// The caller supplies domain-wide statistics (it alone knows the full
  /// stream); each tree inherits them with its own block-clipped valid
  /// size. Untouched blocks become root-only trees filled with the
  /// average, so queries anywhere in the domain stay faithful.
  pub fn finish(&self, average: f32, range: ValueRange) -> Forest {
    let mut blocks = {
      let mut map = self.blocks.lock().unwrap();
      std::mem::take(&mut *map)
    };

    let total = self.grid.x as usize * self.grid.y as usize * self.grid.z as usize;
    let mut trees = Vec::with_capacity(total);
    for x in 0..self.grid.x {
      for y in 0..self.grid.y {
        for z in 0..self.grid.z {
          let cell = UVec3::new(x, y, z);
          debug_assert_eq!(grid_index(self.grid, cell), trees.len());
          let valid = block_valid_size(cell, self.block_width, self.size);
          let stats = TreeStats {
            average,
            range,
            valid_size: valid,
          };
          let tree = match blocks.remove(&cell) {
            Some(builder) => builder.finish(stats),
            None => {
              let builder = TreeBuilder::new(self.layout, self.depth);
              builder.fill_root(valid, average);
              builder.finish(stats)
            }
          };
          trees.push(tree);
        }
      }
    }

    Forest::new(self.layout, self.depth, self.grid, self.size, average, range, trees)
  }
}

#[cfg(test)]
#[path = "forest_builder_test.rs"]
mod forest_builder_test;
