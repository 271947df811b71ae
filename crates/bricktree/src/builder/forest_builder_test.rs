use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{IVec3, Vec3};

use super::*;
use crate::builder::Threshold;
use crate::source::{ArraySource, TileSource};

fn linear_x(size: UVec3) -> ArraySource {
  ArraySource::from_fn(size, |c| c.x as f32)
}

/// Counts every voxel read, to pin down what a build touches.
struct CountingSource {
  size: UVec3,
  reads: AtomicUsize,
}

impl CountingSource {
  fn new(size: UVec3) -> Self {
    Self {
      size,
      reads: AtomicUsize::new(0),
    }
  }
}

impl DenseSource for CountingSource {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, _coord: UVec3) -> f32 {
    self.reads.fetch_add(1, Ordering::Relaxed);
    0.0
  }
}

#[test]
fn forest_round_trips_at_zero_threshold() {
  let size = UVec3::splat(8);
  let source = ArraySource::from_fn(size, |c| (c.x * 64 + c.y * 8 + c.z) as f32);
  let config = BuildConfig::new().with_brick_size(2).with_depth(1);
  let forest = build_forest(&source, &config).unwrap();

  assert_eq!(forest.grid_size(), UVec3::splat(4));
  assert_eq!(forest.tree_count(), 64);
  for x in 0..size.x {
    for y in 0..size.y {
      for z in 0..size.z {
        let coord = UVec3::new(x, y, z);
        assert_eq!(forest.find_value(coord.as_ivec3()), source.get(coord));
      }
    }
  }
}

/// Edge blocks record their overlap with the domain, not the padded block.
#[test]
fn edge_blocks_clip_their_valid_size() {
  let size = UVec3::new(10, 4, 7);
  let source = linear_x(size);
  let config = BuildConfig::new().with_brick_size(2).with_depth(2);
  let forest = build_forest(&source, &config).unwrap();

  assert_eq!(forest.grid_size(), UVec3::new(3, 1, 2));
  assert_eq!(forest.block_width(), 4);
  assert_eq!(forest.valid_size(), size);

  let corner = forest.tree(UVec3::new(2, 0, 1));
  assert_eq!(corner.valid_size(), UVec3::new(2, 4, 3));
  let full = forest.tree(UVec3::new(0, 0, 0));
  assert_eq!(full.valid_size(), UVec3::new(4, 4, 4));
}

/// The forest average weights each tree by its valid voxels.
#[test]
fn forest_average_is_voxel_weighted() {
  let source = linear_x(UVec3::new(6, 2, 2));
  let config = BuildConfig::new().with_brick_size(2).with_depth(1);
  let forest = build_forest(&source, &config).unwrap();

  assert_eq!(forest.grid_size(), UVec3::new(3, 1, 1));
  assert_eq!(forest.tree(UVec3::new(0, 0, 0)).average(), 0.5);
  assert_eq!(forest.tree(UVec3::new(2, 0, 0)).average(), 4.5);
  assert_eq!(forest.average(), 2.5);
  assert_eq!(forest.range(), ValueRange::new(0.0, 5.0));
}

/// A linear field sampled across block boundaries stays linear: the 8
/// trilinear corners resolve through neighboring trees seamlessly.
#[test]
fn linear_field_samples_continuously_across_blocks() {
  let source = linear_x(UVec3::new(8, 4, 4));
  let config = BuildConfig::new().with_brick_size(2).with_depth(1);
  let forest = build_forest(&source, &config).unwrap();

  for step in 0..=20 {
    let x = 0.5 + step as f32 * 0.35;
    let pos = Vec3::new(x, 2.0, 2.0);
    let expected = (x - 0.5).clamp(0.0, 7.0);
    let got = forest.sample(pos);
    assert!(
      (got - expected).abs() < 1e-5,
      "sample at x={x}: got {got}, expected {expected}",
    );
  }
}

/// The capacity check fires before any block is built.
#[test]
fn oversized_root_grid_is_rejected() {
  let probe = ArraySource::from_fn(UVec3::splat(2), |_| 0.0);
  let huge = TileSource::new(probe, UVec3::splat(2048));
  let config = BuildConfig::new().with_brick_size(2).with_depth(1);

  let err = build_forest(&huge, &config).unwrap_err();
  assert!(matches!(
    err,
    Error::RootGridTooLarge {
      cells: 1073741824,
      max: MAX_ROOT_CELLS,
    }
  ));
}

/// An over-capacity grid reads zero voxels, even when a relative
/// threshold would otherwise scan the whole source for its value range.
#[test]
fn oversized_grids_are_never_scanned() {
  let source = CountingSource::new(UVec3::new(2048, 2048, 8));
  let config = BuildConfig::new()
    .with_brick_size(2)
    .with_depth(1)
    .with_threshold(Threshold::RangeFraction(0.5));

  let err = build_forest(&source, &config).unwrap_err();
  assert!(matches!(err, Error::RootGridTooLarge { cells: 4194304, .. }));
  assert_eq!(source.reads.load(Ordering::Relaxed), 0);
}

/// Zero-extent domains are rejected by both forest entry points.
#[test]
fn zero_extent_domains_are_rejected() {
  let source = ArraySource::from_vec(UVec3::new(4, 0, 4), Vec::new());
  let err = build_forest(&source, &BuildConfig::new()).unwrap_err();
  assert!(matches!(err, Error::EmptyDomain { .. }));

  let config = ForestConfig::new(UVec3::new(4, 0, 4));
  let err = ForestBuilder::new(&config).unwrap_err();
  assert!(matches!(err, Error::EmptyDomain { .. }));
}

/// Without an explicit depth the forest collapses to a single tree.
#[test]
fn derived_depth_yields_single_tree() {
  let source = linear_x(UVec3::splat(9));
  let forest = build_forest(&source, &BuildConfig::new().with_brick_size(2)).unwrap();

  assert_eq!(forest.grid_size(), UVec3::ONE);
  assert_eq!(forest.tree_count(), 1);
  assert_eq!(forest.find_value(IVec3::new(7, 3, 2)), 7.0);
}

/// Blocks build independently, so repeated builds are identical.
#[test]
fn parallel_build_is_deterministic() {
  let source = ArraySource::from_fn(UVec3::splat(8), |c| {
    (c.x as f32 * 0.9).sin() * (c.y as f32 + 1.0) - c.z as f32 * 0.3
  });
  let config = BuildConfig::new()
    .with_brick_size(2)
    .with_depth(1)
    .with_threshold(Threshold::Absolute(0.2));

  let a = build_forest(&source, &config).unwrap();
  let b = build_forest(&source, &config).unwrap();

  assert_eq!(a.average(), b.average());
  assert_eq!(a.tree_count(), b.tree_count());
  for (ta, tb) in a.trees().iter().zip(b.trees()) {
    assert_eq!(ta.value_brick_count(), tb.value_brick_count());
    assert_eq!(ta.average(), tb.average());
  }
}

/// Incremental writes route to the owning block; untouched blocks become
/// average-filled root-only trees.
#[test]
fn incremental_forest_fills_untouched_blocks() {
  let config = ForestConfig::new(UVec3::new(4, 2, 2)).with_brick_size(2).with_depth(1);
  let builder = ForestBuilder::new(&config).unwrap();
  assert_eq!(builder.grid_size(), UVec3::new(2, 1, 1));
  assert_eq!(builder.touched_blocks(), 0);

  builder.set(UVec3::new(0, 0, 0), 0, 3.0);
  builder.set(UVec3::new(1, 1, 1), 0, 4.0);
  assert_eq!(builder.touched_blocks(), 1);

  let forest = builder.finish(5.0, ValueRange::new(3.0, 6.0));
  assert_eq!(forest.find_value(IVec3::new(0, 0, 0)), 3.0);
  assert_eq!(forest.find_value(IVec3::new(1, 1, 1)), 4.0);
  // The untouched high-x block answers with the supplied average.
  assert_eq!(forest.find_value(IVec3::new(2, 0, 0)), 5.0);
  assert_eq!(forest.find_value(IVec3::new(3, 1, 1)), 5.0);
  assert_eq!(forest.average(), 5.0);
}

/// Feeding every voxel incrementally matches a dense lossless build.
#[test]
fn incremental_forest_matches_dense_forest() {
  let size = UVec3::splat(4);
  let source = ArraySource::from_fn(size, |c| (c.x * 16 + c.y * 4 + c.z) as f32);

  let dense = build_forest(
    &source,
    &BuildConfig::new().with_brick_size(2).with_depth(1),
  )
  .unwrap();

  let builder = ForestBuilder::new(
    &ForestConfig::new(size).with_brick_size(2).with_depth(1),
  )
  .unwrap();
  for x in 0..size.x {
    for y in 0..size.y {
      for z in 0..size.z {
        let coord = UVec3::new(x, y, z);
        builder.set(coord, 0, source.get(coord));
      }
    }
  }
  let incremental = builder.finish(dense.average(), dense.range());

  assert_eq!(incremental.grid_size(), dense.grid_size());
  for x in 0..size.x as i32 {
    for y in 0..size.y as i32 {
      for z in 0..size.z as i32 {
        let coord = IVec3::new(x, y, z);
        assert_eq!(incremental.find_value(coord), dense.find_value(coord));
      }
    }
  }
}

/// The incremental grid is bounded up front as well.
#[test]
fn incremental_capacity_checked_up_front() {
  let config = ForestConfig::new(UVec3::splat(2048)).with_brick_size(2).with_depth(1);
  let err = ForestBuilder::new(&config).unwrap_err();
  assert!(matches!(err, Error::RootGridTooLarge { .. }));
}
