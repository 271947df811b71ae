//! Streaming runtime: trees whose value bricks load on demand.
//!
//! The topology (index bricks and brick info) is always resident; value
//! brick payloads start on disk and are fetched when sampling first
//! touches them. Queries never block and never fail:
//!
//! - loaded brick: read the covering cell
//! - requested but not yet loaded: read the parent brick's covering cell
//!   if the parent is loaded, else return the tree average
//! - untouched: mark requested, queue a load, return the tree average
//!
//! A pruned region and a not-yet-loaded one are indistinguishable to the
//! caller; both resolve to a coarser value that refines on later queries.
//!
//! Queued requests are drained either by [`StreamingForest::tick`] on the
//! calling thread (budgeted, poll style) or by a [`BackgroundLoader`]
//! owning worker threads.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::{Receiver, Sender};
use glam::{IVec3, U64Vec3, UVec3, Vec3};
use tracing::warn;

use crate::error::Result;
use crate::layout::BrickLayout;
use crate::source::grid_index;
use crate::tree::TreeIndex;
use crate::types::{BrickId, ValueRange};

mod loader;

pub use loader::{BackgroundLoader, LoadRequest};
pub(crate) use loader::BrickReader;

/// Load state of one value brick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BrickState {
  /// No query has touched the brick yet.
  Unrequested = 0,
  /// A load request is queued or in flight.
  Requested = 1,
  /// The payload is resident and readable.
  Loaded = 2,
}

const UNREQUESTED: u8 = BrickState::Unrequested as u8;
const REQUESTED: u8 = BrickState::Requested as u8;
const LOADED: u8 = BrickState::Loaded as u8;

/// One value brick's state byte plus its payload once loaded.
struct BrickSlot {
  state: AtomicU8,
  cells: OnceLock<Box<[f32]>>,
}

impl BrickSlot {
  fn new() -> Self {
    Self {
      state: AtomicU8::new(UNREQUESTED),
      cells: OnceLock::new(),
    }
  }

  fn state(&self) -> BrickState {
    match self.state.load(Ordering::Acquire) {
      LOADED => BrickState::Loaded,
      REQUESTED => BrickState::Requested,
      _ => BrickState::Unrequested,
    }
  }

  /// Cells if loaded. The Acquire load pairs with the Release store in
  /// [`BrickSlot::fulfill`]: observing Loaded implies the payload is set.
  fn cells(&self) -> Option<&[f32]> {
    if self.state.load(Ordering::Acquire) == LOADED {
      self.cells.get().map(|cells| &cells[..])
    } else {
      None
    }
  }

  /// Claims the slot for loading. Only the first caller wins.
  fn try_request(&self) -> bool {
    self
      .state
      .compare_exchange(UNREQUESTED, REQUESTED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  fn fulfill(&self, cells: Box<[f32]>) {
    let _ = self.cells.set(cells);
    self.state.store(LOADED, Ordering::Release);
  }

  /// Reopens the slot after a failed load so a later query retries.
  fn reset(&self) {
    self.state.store(UNREQUESTED, Ordering::Release);
  }
}

/// One tree with resident topology and on-demand value bricks.
pub struct StreamingTree {
  index: TreeIndex,
  average: f32,
  range: ValueRange,
  valid_size: UVec3,
  slots: Vec<BrickSlot>,
  reader: BrickReader,
  /// Grid cell this tree occupies; ZERO for a single-tree file.
  cell: UVec3,
  requests: Sender<LoadRequest>,
}

impl StreamingTree {
  pub(crate) fn new(
    index: TreeIndex,
    average: f32,
    range: ValueRange,
    valid_size: UVec3,
    reader: BrickReader,
    cell: UVec3,
    requests: Sender<LoadRequest>,
  ) -> Self {
    let slots = (0..index.value_brick_count()).map(|_| BrickSlot::new()).collect();
    Self {
      index,
      average,
      range,
      valid_size,
      slots,
      reader,
      cell,
      requests,
    }
  }

  #[inline]
  pub fn index(&self) -> &TreeIndex {
    &self.index
  }

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

  /// Current load state of a value brick.
  pub fn brick_state(&self, brick: BrickId) -> BrickState {
    self.slots[brick.index()].state()
  }

  /// Number of value bricks currently resident.
  pub fn loaded_brick_count(&self) -> usize {
    self
      .slots
      .iter()
      .filter(|slot| slot.state() == BrickState::Loaded)
      .count()
  }

  /// Best available value at a voxel coordinate, clamped into the valid
  /// domain. Never blocks: a miss queues a load and falls back to the
  /// parent brick's cell or the tree average.
  pub fn find_value(&self, coord: IVec3) -> f32 {
    let max = (self.valid_size.as_ivec3() - IVec3::ONE).max(IVec3::ZERO);
    let coord = coord.clamp(IVec3::ZERO, max).as_uvec3();
    let hit = self.index.descend(coord);
    let slot = &self.slots[hit.brick.index()];
    if let Some(cells) = slot.cells() {
      return cells[hit.cell];
    }
    if slot.try_request() {
      // First touch: queue the fetch. A dropped queue leaves the brick
      // requested forever, which still falls back safely below.
      let _ = self.requests.send(LoadRequest {
        cell: self.cell,
        brick: hit.brick,
      });
      return self.average;
    }
    if hit.parent.is_valid() {
      if let Some(cells) = self.slots[hit.parent.index()].cells() {
        return cells[hit.parent_cell];
      }
    }
    self.average
  }

  /// Trilinear sample at a voxel-space position, with the same fallback
  /// behavior as [`StreamingTree::find_value`].
  pub fn sample(&self, pos: Vec3) -> f32 {
    crate::sampler::sample(pos, |coord| self.find_value(coord))
  }

  /// Reads one value brick from disk and installs it.
  pub(crate) fn load_brick(&self, brick: BrickId) -> Result<()> {
    let cells = self.reader.read_brick(brick)?;
    self.slots[brick.index()].fulfill(cells);
    Ok(())
  }

  pub(crate) fn reset_brick(&self, brick: BrickId) {
    self.slots[brick.index()].reset();
  }
}

/// Loads one queued brick into its tree. A failed read logs, reopens the
/// slot for a retry, and returns false.
pub(crate) fn service_request(tree: &StreamingTree, request: LoadRequest) -> bool {
  match tree.load_brick(request.brick) {
    Ok(()) => true,
    Err(error) => {
      warn!(
        "Failed to load brick {} of cell {:?}: {error}",
        request.brick.raw(),
        request.cell
      );
      tree.reset_brick(request.brick);
      false
    }
  }
}

/// A grid of streaming trees sharing one load queue.
///
/// A single-tree file opens as a one-cell forest, so callers deal with
/// one type either way.
pub struct StreamingForest {
  layout: BrickLayout,
  depth: u32,
  grid: UVec3,
  block_width: u64,
  valid_size: UVec3,
  average: f32,
  range: ValueRange,
  trees: Vec<Arc<StreamingTree>>,
  requests: Receiver<LoadRequest>,
}

impl StreamingForest {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    layout: BrickLayout,
    depth: u32,
    grid: UVec3,
    valid_size: UVec3,
    average: f32,
    range: ValueRange,
    trees: Vec<Arc<StreamingTree>>,
    requests: Receiver<LoadRequest>,
  ) -> Self {
    debug_assert_eq!(trees.len() as u64, grid.as_u64vec3().element_product());
    Self {
      layout,
      depth,
      grid,
      block_width: layout.block_width(depth),
      valid_size,
      average,
      range,
      trees,
      requests,
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

  #[inline]
  pub fn grid_size(&self) -> UVec3 {
    self.grid
  }

  #[inline]
  pub fn block_width(&self) -> u64 {
    self.block_width
  }

  #[inline]
  pub fn valid_size(&self) -> UVec3 {
    self.valid_size
  }

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

  /// Tree of one grid cell.
  pub fn tree(&self, cell: UVec3) -> &StreamingTree {
    &self.trees[grid_index(self.grid, cell)]
  }

  pub(crate) fn trees(&self) -> &[Arc<StreamingTree>] {
    &self.trees
  }

  pub(crate) fn requests(&self) -> &Receiver<LoadRequest> {
    &self.requests
  }

  /// Splits a voxel coordinate into a grid cell and a block-local one.
  fn route(&self, coord: UVec3) -> (UVec3, UVec3) {
    let coord = coord.as_u64vec3();
    let width = U64Vec3::splat(self.block_width);
    ((coord / width).as_uvec3(), (coord % width).as_uvec3())
  }

  /// Best available value at a voxel coordinate, clamped into the valid
  /// domain. Same fallback behavior as [`StreamingTree::find_value`].
  pub fn find_value(&self, coord: IVec3) -> f32 {
    let max = (self.valid_size.as_ivec3() - IVec3::ONE).max(IVec3::ZERO);
    let coord = coord.clamp(IVec3::ZERO, max).as_uvec3();
    let (cell, local) = self.route(coord);
    self.trees[grid_index(self.grid, cell)].find_value(local.as_ivec3())
  }

  /// Trilinear sample at a voxel-space position.
  pub fn sample(&self, pos: Vec3) -> f32 {
    crate::sampler::sample(pos, |coord| self.find_value(coord))
  }

  /// Services up to `budget` queued load requests on the calling thread.
  /// Returns the number of bricks loaded.
  pub fn tick(&self, budget: usize) -> usize {
    let mut loaded = 0;
    while loaded < budget {
      let Ok(request) = self.requests.try_recv() else {
        break;
      };
      let tree = &self.trees[grid_index(self.grid, request.cell)];
      if service_request(tree, request) {
        loaded += 1;
      }
    }
    loaded
  }

  /// Queued requests not yet serviced.
  pub fn pending_requests(&self) -> usize {
    self.requests.len()
  }

  /// Spawns worker threads that drain the queue until the loader drops.
  pub fn background_loader(&self, workers: usize) -> BackgroundLoader {
    BackgroundLoader::spawn(self, workers)
  }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
