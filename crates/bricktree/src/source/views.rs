//! Adapter sources layered over other [`DenseSource`]s.
//!
//! Views never copy voxel data. [`WindowSource`] is the workhorse: the
//! forest builder hands each root cell a window of the global domain and
//! builds the cell's tree from it.

use glam::UVec3;

use crate::source::{grid_index, DenseSource};
use crate::types::VoxelScalar;

/// Owned grid of a narrower storage scalar, widened to f32 on read.
///
/// Keeps `uint8` or `double` datasets at their native size in memory.
pub struct ConvertSource<T: VoxelScalar> {
  size: UVec3,
  values: Vec<T>,
}

impl<T: VoxelScalar> ConvertSource<T> {
  /// Wraps an owned value array of exactly `size.x · size.y · size.z`
  /// elements.
  ///
  /// # Panics
  ///
  /// Panics when the length does not match the extent.
  pub fn from_vec(size: UVec3, values: Vec<T>) -> Self {
    let expected = size.x as usize * size.y as usize * size.z as usize;
    assert_eq!(
      values.len(),
      expected,
      "value array length {} does not match extent {size}",
      values.len(),
    );
    Self { size, values }
  }
}

impl<T: VoxelScalar> DenseSource for ConvertSource<T> {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, coord: UVec3) -> f32 {
    self.values[grid_index(self.size, coord)].to_f32()
  }
}

/// Repeats an inner source to a larger virtual extent.
///
/// Coordinates wrap modulo the inner size, so a small probe volume can
/// stand in for an arbitrarily large test domain.
pub struct TileSource<S> {
  inner: S,
  size: UVec3,
}

impl<S: DenseSource> TileSource<S> {
  pub fn new(inner: S, size: UVec3) -> Self {
    Self { inner, size }
  }
}

impl<S: DenseSource> DenseSource for TileSource<S> {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, coord: UVec3) -> f32 {
    self.inner.get(coord % self.inner.size())
  }
}

/// Sub-box view `[begin, begin + size)` of an inner source.
pub struct WindowSource<S> {
  inner: S,
  begin: UVec3,
  size: UVec3,
}

impl<S: DenseSource> WindowSource<S> {
  /// # Panics
  ///
  /// Panics when the window reaches outside the inner grid.
  pub fn new(inner: S, begin: UVec3, size: UVec3) -> Self {
    let end = begin + size;
    let bound = inner.size();
    assert!(
      end.cmple(bound).all(),
      "window [{begin}, {end}) reaches outside grid extent {bound}",
    );
    Self { inner, begin, size }
  }
}

impl<S: DenseSource> DenseSource for WindowSource<S> {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, coord: UVec3) -> f32 {
    self.inner.get(self.begin + coord)
  }
}

/// Sources of equal X/Y extent stacked along Z.
///
/// Lookup walks the cumulative z-offsets, so slabs of uneven thickness
/// (typical when a dataset arrives as per-file slices) compose into one
/// contiguous domain.
pub struct SliceStackSource {
  slabs: Vec<Box<dyn DenseSource>>,
  /// z_starts[i] is the first global z of slab i; a trailing entry holds
  /// the total depth.
  z_starts: Vec<u32>,
  size: UVec3,
}

impl SliceStackSource {
  /// # Panics
  ///
  /// Panics when `slabs` is empty or the slabs disagree on X/Y extent.
  pub fn new(slabs: Vec<Box<dyn DenseSource>>) -> Self {
    assert!(!slabs.is_empty(), "slice stack needs at least one slab");
    let base = slabs[0].size();
    let mut z_starts = Vec::with_capacity(slabs.len() + 1);
    let mut depth = 0u32;
    for slab in &slabs {
      let size = slab.size();
      assert_eq!(
        (size.x, size.y),
        (base.x, base.y),
        "slab extent {size} does not match stack extent {base}",
      );
      z_starts.push(depth);
      depth += size.z;
    }
    z_starts.push(depth);
    Self {
      slabs,
      z_starts,
      size: UVec3::new(base.x, base.y, depth),
    }
  }
}

impl DenseSource for SliceStackSource {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, coord: UVec3) -> f32 {
    let slab = self.z_starts.partition_point(|&start| start <= coord.z) - 1;
    let slab = slab.min(self.slabs.len() - 1);
    let local_z = coord.z - self.z_starts[slab];
    self.slabs[slab].get(UVec3::new(coord.x, coord.y, local_z))
  }
}
