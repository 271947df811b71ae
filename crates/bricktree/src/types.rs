//! Core value types shared across the crate.

use serde::{Deserialize, Serialize};

/// Handle of a brick inside one tree's arenas.
///
/// Identifiers are assigned monotonically as bricks are created during a
/// build and are never reused. The same handle space is used for value
/// bricks and index bricks; which arena a handle addresses is determined
/// by the accessor it is passed to.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BrickId(u32);

impl BrickId {
  /// Sentinel for "no brick". Serializes as `0xFFFF_FFFF`, which is the
  /// on-disk `int32` value -1 of the brick-info section.
  pub const INVALID: BrickId = BrickId(u32::MAX);

  /// Identifier of the root value brick. The root always exists.
  pub const ROOT: BrickId = BrickId(0);

  pub fn new(raw: u32) -> Self {
    Self(raw)
  }

  pub fn from_index(index: usize) -> Self {
    Self(index as u32)
  }

  /// True for every id except [`BrickId::INVALID`].
  #[inline]
  pub fn is_valid(&self) -> bool {
    self.0 != u32::MAX
  }

  /// Arena index of this brick. Must not be called on an invalid id.
  #[inline]
  pub fn index(&self) -> usize {
    debug_assert!(self.is_valid(), "index() on invalid brick id");
    self.0 as usize
  }

  pub fn raw(&self) -> u32 {
    self.0
  }
}

/// Closed min/max interval over sampled scalars.
///
/// Starts inverted (`empty`) and grows via [`ValueRange::extend`], so a
/// fold over any number of samples needs no special first-element case.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
  pub lo: f32,
  pub hi: f32,
}

impl ValueRange {
  /// Range with inverted extents (ready for accumulation).
  pub fn empty() -> Self {
    Self {
      lo: f32::INFINITY,
      hi: f32::NEG_INFINITY,
    }
  }

  pub fn new(lo: f32, hi: f32) -> Self {
    Self { lo, hi }
  }

  /// Grow the range to include a sample.
  #[inline]
  pub fn extend(&mut self, value: f32) {
    self.lo = self.lo.min(value);
    self.hi = self.hi.max(value);
  }

  /// Grow the range to include another range.
  #[inline]
  pub fn merge(&mut self, other: ValueRange) {
    self.lo = self.lo.min(other.lo);
    self.hi = self.hi.max(other.hi);
  }

  /// True if no sample was ever accumulated.
  pub fn is_empty(&self) -> bool {
    self.lo > self.hi
  }

  /// Spread between the extremes; `0.0` for empty ranges.
  pub fn span(&self) -> f32 {
    if self.is_empty() {
      0.0
    } else {
      self.hi - self.lo
    }
  }

  pub fn contains(&self, value: f32) -> bool {
    self.lo <= value && value <= self.hi
  }
}

impl Default for ValueRange {
  fn default() -> Self {
    Self::empty()
  }
}

/// On-disk scalar encoding of a value-brick payload.
///
/// In memory every tree holds `f32` cells; the format only decides how the
/// payload section is encoded in the blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoxelFormat {
  /// 1 byte per cell. Encoding rounds to nearest (ties away from zero)
  /// and clamps to [0, 255]; decoding widens exactly.
  Uint8,
  /// 4 bytes per cell, stored verbatim. The default.
  Float32,
  /// 8 bytes per cell, widened on write and narrowed with `as` on read.
  Float64,
}

impl VoxelFormat {
  /// Format name as it appears in sidecar documents.
  pub fn name(&self) -> &'static str {
    match self {
      VoxelFormat::Uint8 => "uint8",
      VoxelFormat::Float32 => "float",
      VoxelFormat::Float64 => "double",
    }
  }

  /// Parse a sidecar format name.
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "uint8" => Some(VoxelFormat::Uint8),
      "float" => Some(VoxelFormat::Float32),
      "double" => Some(VoxelFormat::Float64),
      _ => None,
    }
  }

  /// Encoded size of one cell in bytes.
  pub fn bytes_per_value(&self) -> usize {
    match self {
      VoxelFormat::Uint8 => 1,
      VoxelFormat::Float32 => 4,
      VoxelFormat::Float64 => 8,
    }
  }
}

impl Default for VoxelFormat {
  fn default() -> Self {
    VoxelFormat::Float32
  }
}

/// Storage scalar of a dense array or an encoded brick payload.
///
/// Implementations own both directions of the f32 conversion, so the
/// `uint8` rounding rule lives in exactly one place.
pub trait VoxelScalar: bytemuck::Pod + Send + Sync {
  /// Format tag matching this scalar.
  const FORMAT: VoxelFormat;

  fn to_f32(self) -> f32;
  fn from_f32(value: f32) -> Self;
}

impl VoxelScalar for u8 {
  const FORMAT: VoxelFormat = VoxelFormat::Uint8;

  #[inline]
  fn to_f32(self) -> f32 {
    self as f32
  }

  #[inline]
  fn from_f32(value: f32) -> Self {
    value.round().clamp(0.0, 255.0) as u8
  }
}

impl VoxelScalar for f32 {
  const FORMAT: VoxelFormat = VoxelFormat::Float32;

  #[inline]
  fn to_f32(self) -> f32 {
    self
  }

  #[inline]
  fn from_f32(value: f32) -> Self {
    value
  }
}

impl VoxelScalar for f64 {
  const FORMAT: VoxelFormat = VoxelFormat::Float64;

  #[inline]
  fn to_f32(self) -> f32 {
    self as f32
  }

  #[inline]
  fn from_f32(value: f32) -> Self {
    value as f64
  }
}
