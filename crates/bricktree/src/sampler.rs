//! Voxel-centered trilinear sampling.
//!
//! Voxel `(i, j, k)` holds its value at position `(i+0.5, j+0.5, k+0.5)`,
//! so a sample at an arbitrary position blends the 8 voxels whose centers
//! surround it. The lookup resolves each corner independently; the caller
//! decides what a corner lookup means (tree cell, forest routing, or a
//! streaming fallback), and out-of-range corners rely on the lookup's
//! clamping.

use glam::{IVec3, Vec3};

/// Trilinear blend of the 8 voxel centers around `pos`.
pub(crate) fn sample(pos: Vec3, lookup: impl Fn(IVec3) -> f32) -> f32 {
  let centered = pos - Vec3::splat(0.5);
  let floor = centered.floor();
  let t = centered - floor;
  let base = floor.as_ivec3();

  let mut blended = 0.0;
  for corner in 0..8 {
    let offset = IVec3::new(corner >> 2 & 1, corner >> 1 & 1, corner & 1);
    let wx = if offset.x == 1 { t.x } else { 1.0 - t.x };
    let wy = if offset.y == 1 { t.y } else { 1.0 - t.y };
    let wz = if offset.z == 1 { t.z } else { 1.0 - t.z };
    let weight = wx * wy * wz;
    if weight > 0.0 {
      blended += weight * lookup(base + offset);
    }
  }
  blended
}
