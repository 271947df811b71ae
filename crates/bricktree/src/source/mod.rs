//! Dense scalar field inputs for tree construction.
//!
//! Builders read their input through [`DenseSource`]: a random-access view
//! of a dense 3D scalar grid. The trait carries clamped access and range
//! scans as default methods so adapters only implement `size` + `get`.

use glam::{IVec3, UVec3};

use crate::types::ValueRange;

pub mod views;

pub use views::{ConvertSource, SliceStackSource, TileSource, WindowSource};

/// Random-access dense scalar grid.
///
/// Implementations must be cheap to call per voxel: builders walk every
/// in-domain cell, possibly from several rayon workers at once.
pub trait DenseSource: Send + Sync {
  /// Grid extent in voxels per axis.
  fn size(&self) -> UVec3;

  /// Value at `coord`. Callers stay within `[0, size)`.
  fn get(&self, coord: UVec3) -> f32;

  /// Value at `coord`, clamping each axis into the grid.
  fn get_safe(&self, coord: IVec3) -> f32 {
    let max = (self.size().as_ivec3() - IVec3::ONE).max(IVec3::ZERO);
    self.get(coord.clamp(IVec3::ZERO, max).as_uvec3())
  }

  /// Min/max over the box `[begin, end)`, clipped to the grid.
  ///
  /// Returns an empty range when the clipped box is empty.
  fn value_range(&self, begin: IVec3, end: IVec3) -> ValueRange {
    let size = self.size().as_ivec3();
    let lo = begin.clamp(IVec3::ZERO, size);
    let hi = end.clamp(IVec3::ZERO, size);
    let mut range = ValueRange::empty();
    for x in lo.x..hi.x {
      for y in lo.y..hi.y {
        for z in lo.z..hi.z {
          range.extend(self.get(UVec3::new(x as u32, y as u32, z as u32)));
        }
      }
    }
    range
  }
}

/// Blanket impl for references, so windows over a shared source can be
/// fanned out to rayon workers.
impl<S: DenseSource + ?Sized> DenseSource for &S {
  fn size(&self) -> UVec3 {
    (**self).size()
  }

  fn get(&self, coord: UVec3) -> f32 {
    (**self).get(coord)
  }

  fn get_safe(&self, coord: IVec3) -> f32 {
    (**self).get_safe(coord)
  }

  fn value_range(&self, begin: IVec3, end: IVec3) -> ValueRange {
    (**self).value_range(begin, end)
  }
}

/// Blanket impl for boxed trait objects.
impl DenseSource for Box<dyn DenseSource> {
  fn size(&self) -> UVec3 {
    (**self).size()
  }

  fn get(&self, coord: UVec3) -> f32 {
    (**self).get(coord)
  }

  fn get_safe(&self, coord: IVec3) -> f32 {
    (**self).get_safe(coord)
  }

  fn value_range(&self, begin: IVec3, end: IVec3) -> ValueRange {
    (**self).value_range(begin, end)
  }
}

/// Linear index into a dense X-major, Z-minor grid of the given extent.
#[inline]
pub(crate) fn grid_index(size: UVec3, coord: UVec3) -> usize {
  (coord.x as usize * size.y as usize + coord.y as usize) * size.z as usize + coord.z as usize
}

/// Owned f32 grid in the crate's X-major, Z-minor layout.
pub struct ArraySource {
  size: UVec3,
  values: Vec<f32>,
}

impl ArraySource {
  /// Wraps an owned value array of exactly `size.x · size.y · size.z`
  /// elements.
  ///
  /// # Panics
  ///
  /// Panics when the length does not match the extent.
  pub fn from_vec(size: UVec3, values: Vec<f32>) -> Self {
    let expected = size.x as usize * size.y as usize * size.z as usize;
    assert_eq!(
      values.len(),
      expected,
      "value array length {} does not match extent {size}",
      values.len(),
    );
    Self { size, values }
  }

  /// Fills a grid by evaluating `f` at every coordinate.
  pub fn from_fn(size: UVec3, mut f: impl FnMut(UVec3) -> f32) -> Self {
    let mut values = Vec::with_capacity(size.x as usize * size.y as usize * size.z as usize);
    for x in 0..size.x {
      for y in 0..size.y {
        for z in 0..size.z {
          values.push(f(UVec3::new(x, y, z)));
        }
      }
    }
    Self { size, values }
  }
}

impl DenseSource for ArraySource {
  fn size(&self) -> UVec3 {
    self.size
  }

  fn get(&self, coord: UVec3) -> f32 {
    self.values[grid_index(self.size, coord)]
  }
}
