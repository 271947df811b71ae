//! Bottom-up threshold-pruned build from a dense source.
//!
//! The recursion is post-order: children summarize (and possibly write)
//! themselves before the parent decides anything. A node materializes its
//! brick only when its value range spans more than the threshold; since a
//! child's range is contained in its parent's, a materialized node always
//! has a materialized parent chain, so every written brick is reachable.
//!
//! Averages are coverage-weighted: each child contributes its f64 value
//! sum and its in-domain voxel count, so blocks that overhang the domain
//! do not dilute the statistics with padding.

use glam::UVec3;
use tracing::debug;
use web_time::Instant;

use crate::builder::{TreeBuilder, TreeStats};
use crate::error::{Error, Result};
use crate::layout::BrickLayout;
use crate::source::DenseSource;
use crate::tree::Tree;
use crate::types::ValueRange;

/// Pruning threshold of a build.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Threshold {
  /// Prune subtrees whose value span is at most this many value units.
  Absolute(f32),
  /// Fraction of the source's global value span; resolved once before the
  /// recursion starts, so pruning is consistent across forest cells.
  RangeFraction(f32),
}

impl Threshold {
  /// Lossless: only constant subtrees collapse.
  pub const LOSSLESS: Threshold = Threshold::Absolute(0.0);

  pub(crate) fn resolve<S: DenseSource>(&self, source: &S) -> f32 {
    match *self {
      Threshold::Absolute(value) => value,
      Threshold::RangeFraction(fraction) => {
        let size = source.size().as_ivec3();
        fraction * source.value_range(glam::IVec3::ZERO, size).span()
      }
    }
  }
}

/// Configuration for dense tree and forest builds.
#[derive(Clone, Copy, Debug)]
pub struct BuildConfig {
  /// Cells per brick axis, a power of two in `[2, 64]`.
  pub brick_size: u32,
  /// Tree depth; `None` derives the smallest depth covering the source,
  /// which makes a forest build collapse to a single tree.
  pub depth: Option<u32>,
  /// Pruning threshold.
  pub threshold: Threshold,
}

impl BuildConfig {
  pub fn new() -> Self {
    Self {
      brick_size: 8,
      depth: None,
      threshold: Threshold::LOSSLESS,
    }
  }

  pub fn with_brick_size(mut self, brick_size: u32) -> Self {
    self.brick_size = brick_size;
    self
  }

  pub fn with_depth(mut self, depth: u32) -> Self {
    self.depth = Some(depth);
    self
  }

  pub fn with_threshold(mut self, threshold: Threshold) -> Self {
    self.threshold = threshold;
    self
  }

  /// Layout and depth for a domain `extent` cells across its longest axis.
  ///
  /// The threshold resolves separately, after the domain and capacity
  /// checks pass: a relative threshold scans the whole source.
  pub(crate) fn resolve(&self, extent: u32) -> Result<(BrickLayout, u32)> {
    let layout = BrickLayout::new(self.brick_size)?;
    let depth = self
      .depth
      .unwrap_or_else(|| layout.depth_for(extent))
      .clamp(1, layout.max_depth());
    Ok((layout, depth))
  }
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self::new()
  }
}

/// Builds one tree over the whole source.
///
/// The source must fit in one block (`N^depth` per axis) when the depth is
/// explicit; a derived depth always fits. Sources with a zero axis are
/// rejected, so saved statistics stay finite.
pub fn build_tree<S: DenseSource>(source: &S, config: &BuildConfig) -> Result<Tree> {
  let size = source.size();
  if size.min_element() == 0 {
    return Err(Error::EmptyDomain { extent: size });
  }
  let extent = size.max_element();
  let (layout, depth) = config.resolve(extent)?;
  if (extent as u64) > layout.block_width(depth) {
    return Err(Error::DomainTooLarge {
      extent,
      block_width: layout.block_width(depth) as u32,
      brick_size: layout.size(),
      depth,
    });
  }
  let threshold = config.threshold.resolve(source);
  let started = Instant::now();
  let tree = build_block(source, layout, depth, threshold);
  debug!(
    "Built tree: {} value bricks, {} index bricks, depth {} in {:.1}ms",
    tree.value_brick_count(),
    tree.index_brick_count(),
    depth,
    started.elapsed().as_secs_f64() * 1e3,
  );
  Ok(tree)
}

/// Builds one block after validation. Infallible: the forest uses it per
/// cell without re-checking.
pub(crate) fn build_block<S: DenseSource>(
  source: &S,
  layout: BrickLayout,
  depth: u32,
  threshold: f32,
) -> Tree {
  let builder = TreeBuilder::new(layout, depth);
  let summary = build_node(source, &builder, layout, depth, 0, UVec3::ZERO, threshold);

  let average = summary.average();
  if summary.range.span() <= threshold {
    // The whole block collapsed; the root still answers every query with
    // the block average.
    builder.fill_root(source.size(), average);
  }

  builder.finish(TreeStats {
    average,
    range: summary.range,
    valid_size: source.size(),
  })
}

/// What a node reports upward.
struct NodeSummary {
  /// f64 sum of all in-domain voxel values below this node.
  sum: f64,
  /// In-domain voxel count below this node.
  weight: f64,
  range: ValueRange,
}

impl NodeSummary {
  fn average(&self) -> f32 {
    if self.weight > 0.0 {
      (self.sum / self.weight) as f32
    } else {
      0.0
    }
  }
}

fn build_node<S: DenseSource>(
  source: &S,
  builder: &TreeBuilder,
  layout: BrickLayout,
  depth: u32,
  level: u32,
  origin: UVec3,
  threshold: f32,
) -> NodeSummary {
  let n = layout.size();
  let size = source.size().as_u64vec3();
  // Finest cells per axis under one cell of this node.
  let cell_span = layout.block_width(depth - 1 - level);
  let leaf = level == depth - 1;

  let mut scratch = vec![0.0f32; layout.cells()];
  let mut written = vec![false; layout.cells()];
  let mut sum = 0.0f64;
  let mut weight = 0.0f64;
  let mut range = ValueRange::empty();

  for x in 0..n {
    for y in 0..n {
      for z in 0..n {
        let cell = UVec3::new(x, y, z);
        let coord = origin + cell;
        let covered = (coord.as_u64vec3() * cell_span).cmplt(size).all();
        if !covered {
          continue;
        }
        let slot = layout.cell_index(cell);
        if leaf {
          let value = source.get(coord);
          scratch[slot] = value;
          written[slot] = true;
          range.extend(value);
          sum += value as f64;
          weight += 1.0;
        } else {
          let child = build_node(source, builder, layout, depth, level + 1, coord * n, threshold);
          if child.weight > 0.0 {
            scratch[slot] = child.average();
            written[slot] = true;
            range.merge(child.range);
            sum += child.sum;
            weight += child.weight;
          }
        }
      }
    }
  }

  if range.span() > threshold {
    for slot in 0..layout.cells() {
      if written[slot] {
        builder.set(origin + layout.cell_coord(slot), level, scratch[slot]);
      }
    }
  }

  NodeSummary { sum, weight, range }
}

#[cfg(test)]
#[path = "dense_test.rs"]
mod dense_test;
