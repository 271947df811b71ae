//! Error types and result alias for the crate.
//!
//! Build-time and open-time failures are fatal and reported through these
//! variants before any output is committed. Runtime sampling never returns
//! an error: out-of-range queries clamp to the valid domain, and streaming
//! misses degrade to ancestor/average fallbacks instead of failing.

use std::path::PathBuf;

use glam::UVec3;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("'{}' is truncated: expected {expected} bytes, found {found}", .path.display())]
  Truncated {
    path: PathBuf,
    expected: u64,
    found: u64,
  },

  #[error("'{}' is not a brick tree sidecar (bad magic '{magic}')", .path.display())]
  BadMagic { path: PathBuf, magic: String },

  #[error("unsupported sidecar version {found} (this build reads version {supported})")]
  BadVersion { found: u32, supported: u32 },

  #[error("unsupported brick size {0} (supported: 2, 4, 8, 16, 32, 64)")]
  UnsupportedBrickSize(u32),

  #[error("unsupported voxel format '{0}' (supported: uint8, float, double)")]
  UnsupportedVoxelFormat(String),

  #[error("inconsistent sidecar for '{}': {detail}", .path.display())]
  SectionMismatch { path: PathBuf, detail: String },

  #[error("sidecar error: {0}")]
  Metadata(#[from] serde_json::Error),

  #[error("domain extent {extent} is empty (every axis must be at least 1)")]
  EmptyDomain { extent: UVec3 },

  #[error("domain extent {extent} exceeds block width {block_width} (brick size {brick_size}, depth {depth})")]
  DomainTooLarge {
    extent: u32,
    block_width: u32,
    brick_size: u32,
    depth: u32,
  },

  #[error("root grid of {cells} cells exceeds the limit of {max}")]
  RootGridTooLarge { cells: u64, max: u64 },
}
