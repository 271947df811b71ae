use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use glam::{IVec3, UVec3};

use crate::builder::{build_forest, build_tree, BuildConfig, Threshold};
use crate::format::{
  open_forest_streaming, open_tree_streaming, tree_blob_path, write_forest, write_tree,
};
use crate::source::{ArraySource, DenseSource};
use crate::types::BrickId;

use super::BrickState;

static TEST_UNIQUIFIER: AtomicUsize = AtomicUsize::new(0);

fn test_dir(name: &str) -> PathBuf {
  let serial = TEST_UNIQUIFIER.fetch_add(1, Ordering::Relaxed);
  let mut path = std::env::temp_dir();
  path.push(format!(
    "bricktree-stream-{name}-{}-{serial}",
    std::process::id()
  ));
  let _ = std::fs::remove_dir_all(&path);
  std::fs::create_dir_all(&path).expect("create test dir");
  path
}

fn lossless_config() -> BuildConfig {
  BuildConfig::new()
    .with_brick_size(2)
    .with_depth(2)
    .with_threshold(Threshold::LOSSLESS)
}

fn checkered(size: UVec3) -> ArraySource {
  ArraySource::from_fn(size, |c| ((c.x + 2 * c.y + 3 * c.z) % 7) as f32)
}

/// x < 2 is flat and prunes away under a 0.5 threshold; x >= 2 varies
/// enough that its octants stay refined.
fn half_pruned_source() -> ArraySource {
  ArraySource::from_fn(UVec3::splat(4), |c| {
    if c.x < 2 {
      0.0
    } else {
      2.0 * c.z as f32 + c.x as f32
    }
  })
}

#[test]
fn single_trees_open_as_one_cell_forests() {
  let dir = test_dir("one-cell");
  let base = dir.join("volume");
  let tree = build_tree(&checkered(UVec3::splat(4)), &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  assert_eq!(streaming.grid_size(), UVec3::ONE);
  assert_eq!(streaming.tree_count(), 1);
  assert_eq!(streaming.valid_size(), UVec3::splat(4));
  assert_eq!(streaming.average(), tree.average());
  assert_eq!(streaming.tree(UVec3::ZERO).loaded_brick_count(), 0);
}

#[test]
fn untouched_regions_answer_with_the_average() {
  let dir = test_dir("untouched");
  let base = dir.join("volume");
  let tree = build_tree(&checkered(UVec3::splat(4)), &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  assert_eq!(streaming.find_value(IVec3::new(1, 2, 3)), tree.average());
  // The miss queued exactly one load and marked the brick.
  assert_eq!(streaming.pending_requests(), 1);
  let hit = streaming.tree(UVec3::ZERO).index().descend(UVec3::new(1, 2, 3));
  assert_eq!(
    streaming.tree(UVec3::ZERO).brick_state(hit.brick),
    BrickState::Requested
  );
}

/// The fallback chain promotes as data arrives: global average, then the
/// loaded parent's covering cell, then the brick's own cell.
#[test]
fn queries_refine_as_bricks_load() {
  let dir = test_dir("refine");
  let base = dir.join("volume");
  let config = BuildConfig::new()
    .with_brick_size(2)
    .with_depth(2)
    .with_threshold(Threshold::Absolute(0.5));
  let tree = build_tree(&half_pruned_source(), &config).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  let cell = streaming.tree(UVec3::ZERO);
  let average = tree.average();
  assert_eq!(average, 2.75);

  // The flat half stops at the root brick. First touch queues the root.
  assert_eq!(streaming.find_value(IVec3::ZERO), average);
  assert_eq!(cell.brick_state(BrickId::ROOT), BrickState::Requested);
  assert_eq!(streaming.tick(1), 1);
  assert_eq!(cell.brick_state(BrickId::ROOT), BrickState::Loaded);
  assert_eq!(streaming.find_value(IVec3::ZERO), 0.0);

  // The varying half descends to a leaf brick that is still on disk.
  let coord = IVec3::new(3, 0, 3);
  assert_eq!(streaming.find_value(coord), average);
  // In flight: the loaded root answers with its covering octant average.
  assert_eq!(streaming.find_value(coord), 7.5);
  assert_eq!(streaming.tick(1), 1);
  assert_eq!(streaming.find_value(coord), 9.0);
}

#[test]
fn tick_budget_bounds_work_per_call() {
  let dir = test_dir("budget");
  let base = dir.join("volume");
  let tree = build_tree(&checkered(UVec3::splat(4)), &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  streaming.find_value(IVec3::new(0, 0, 0));
  streaming.find_value(IVec3::new(3, 0, 0));
  streaming.find_value(IVec3::new(0, 3, 0));
  assert_eq!(streaming.pending_requests(), 3);

  assert_eq!(streaming.tick(1), 1);
  assert_eq!(streaming.pending_requests(), 2);
  assert_eq!(streaming.tick(8), 2);
  assert_eq!(streaming.pending_requests(), 0);
  assert_eq!(streaming.tick(8), 0);
  assert_eq!(streaming.tree(UVec3::ZERO).loaded_brick_count(), 3);
}

#[test]
fn loaded_values_match_the_eager_tree() {
  let dir = test_dir("exact");
  let base = dir.join("volume");
  let source = checkered(UVec3::splat(4));
  let tree = build_tree(&source, &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  // First pass queues every touched brick, second pass reads exact cells.
  for x in 0..4 {
    for y in 0..4 {
      for z in 0..4 {
        streaming.find_value(IVec3::new(x, y, z));
      }
    }
  }
  streaming.tick(usize::MAX);
  for x in 0..4 {
    for y in 0..4 {
      for z in 0..4 {
        let coord = IVec3::new(x, y, z);
        assert_eq!(streaming.find_value(coord), source.get(coord.as_uvec3()), "at {coord}");
      }
    }
  }
}

#[test]
fn forest_streams_blocks_independently() {
  let dir = test_dir("forest");
  let base = dir.join("volume");
  let source = checkered(UVec3::splat(8));
  let forest = build_forest(&source, &lossless_config()).unwrap();
  write_forest(&forest, &base).unwrap();

  let streaming = open_forest_streaming(&base).unwrap();
  assert_eq!(streaming.grid_size(), UVec3::splat(2));
  assert_eq!(streaming.tree_count(), 8);

  streaming.find_value(IVec3::new(1, 1, 1));
  streaming.find_value(IVec3::new(6, 1, 1));
  assert_eq!(streaming.pending_requests(), 2);
  assert_eq!(streaming.tick(8), 2);

  assert_eq!(
    streaming.find_value(IVec3::new(1, 1, 1)),
    source.get(UVec3::new(1, 1, 1))
  );
  assert_eq!(
    streaming.find_value(IVec3::new(6, 1, 1)),
    source.get(UVec3::new(6, 1, 1))
  );
  assert!(streaming.tree(UVec3::ZERO).loaded_brick_count() > 0);
  assert_eq!(streaming.tree(UVec3::new(1, 1, 1)).loaded_brick_count(), 0);
}

#[test]
fn background_loader_services_the_queue() {
  let dir = test_dir("background");
  let base = dir.join("volume");
  let source = checkered(UVec3::splat(4));
  let tree = build_tree(&source, &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  let loader = streaming.background_loader(2);
  assert_eq!(loader.worker_count(), 2);
  for x in 0..4 {
    for y in 0..4 {
      for z in 0..4 {
        streaming.find_value(IVec3::new(x, y, z));
      }
    }
  }

  // Poll until the workers catch up.
  let mut settled = false;
  'poll: for _ in 0..1000 {
    for x in 0..4 {
      for y in 0..4 {
        for z in 0..4 {
          let coord = IVec3::new(x, y, z);
          if streaming.find_value(coord) != source.get(coord.as_uvec3()) {
            std::thread::sleep(Duration::from_millis(1));
            continue 'poll;
          }
        }
      }
    }
    settled = true;
    break;
  }
  assert!(settled, "background workers did not load every brick");
  loader.stop();
}

/// A failed read logs, reopens the slot, and keeps queries on the
/// fallback path so a later touch can retry.
#[test]
fn failed_loads_reopen_the_slot() {
  let dir = test_dir("failed-load");
  let base = dir.join("volume");
  let tree = build_tree(&checkered(UVec3::splat(4)), &lossless_config()).unwrap();
  write_tree(&tree, &base).unwrap();

  let streaming = open_tree_streaming(&base).unwrap();
  // Truncate the blob behind the open handle; the next read hits EOF.
  std::fs::write(tree_blob_path(&base), b"").unwrap();

  let cell = streaming.tree(UVec3::ZERO);
  let hit = cell.index().descend(UVec3::ZERO);
  assert_eq!(streaming.find_value(IVec3::ZERO), tree.average());
  assert_eq!(cell.brick_state(hit.brick), BrickState::Requested);

  assert_eq!(streaming.tick(8), 0);
  assert_eq!(streaming.pending_requests(), 0);
  assert_eq!(cell.brick_state(hit.brick), BrickState::Unrequested);

  // Still answering, and the retry queues the brick again.
  assert_eq!(streaming.find_value(IVec3::ZERO), tree.average());
  assert_eq!(streaming.pending_requests(), 1);
}
