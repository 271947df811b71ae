//! bricktree - Sparse level-of-detail brick trees over dense scalar volumes
//!
//! This crate builds hierarchical brick trees from dense 3D scalar data.
//! Every node is a fixed N³ brick of cells; regions whose values stay
//! within a pruning threshold keep only their coarse brick, so flat parts
//! of a volume cost almost nothing while detailed parts refine down to
//! the source resolution. Queries walk coarse-to-fine and resolve at
//! whatever level survived pruning.
//!
//! # Features
//!
//! - **Threshold-pruned build**: Bottom-up construction from any
//!   [`DenseSource`], lossless at threshold zero
//! - **Forests**: Large domains split into a grid of independent trees,
//!   built in parallel with rayon
//! - **Incremental builders**: Write cells at chosen levels without a
//!   dense source, then finish into the same tree type
//! - **On-disk format**: Binary brick blobs plus JSON sidecars, with
//!   uint8/float/double cell encodings
//! - **Streaming**: Value bricks load on demand; queries never block,
//!   falling back to coarser data until loads complete
//! - **Trilinear sampling**: Filtered reads at voxel-space positions
//!
//! # Example
//!
//! ```ignore
//! use bricktree::{build_tree, ArraySource, BuildConfig};
//! use glam::{UVec3, Vec3};
//!
//! // A sphere's signed distance, sampled on a 64³ grid.
//! let source = ArraySource::from_fn(UVec3::splat(64), |c| {
//!   (c.as_vec3() - 32.0).length() - 16.0
//! });
//!
//! let tree = build_tree(&source, &BuildConfig::new().with_brick_size(8))?;
//! println!("{} value bricks", tree.value_brick_count());
//!
//! // Round-trip through disk, then sample without loading everything.
//! bricktree::write_tree(&tree, "sphere")?;
//! let streaming = bricktree::open_tree_streaming("sphere")?;
//! let distance = streaming.sample(Vec3::new(10.0, 32.0, 32.0));
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod types;
pub use types::{BrickId, ValueRange, VoxelFormat, VoxelScalar};

pub mod layout;
pub use layout::BrickLayout;

// Dense input adapters
pub mod source;
pub use source::{
  ArraySource, ConvertSource, DenseSource, SliceStackSource, TileSource, WindowSource,
};

// In-memory trees and the grid-of-trees container
pub mod tree;
pub use tree::{DescentHit, Tree, TreeIndex};

pub mod forest;
pub use forest::Forest;

// Threshold-pruned construction, dense and incremental
pub mod builder;
pub use builder::{
  build_forest, build_tree, BuildConfig, ForestBuilder, ForestConfig, Threshold, TreeBuilder,
  TreeStats, MAX_ROOT_CELLS,
};

// Blob + sidecar serialization
pub mod format;
pub use format::{
  open_forest, open_forest_streaming, open_tree, open_tree_streaming, write_forest,
  write_forest_as, write_tree, write_tree_as, FORMAT_VERSION, MAGIC,
};

// On-demand loading runtime
pub mod stream;
pub use stream::{BackgroundLoader, BrickState, LoadRequest, StreamingForest, StreamingTree};

// Trilinear filtering over integer lookups
mod sampler;
