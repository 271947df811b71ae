//! Serializes trees and forests to blob + sidecar files.
//!
//! Blobs are encoded fully in memory and written before the sidecar, so a
//! crash mid-write never leaves a sidecar pointing at missing or partial
//! data. There is no in-place update; writers always emit a full set.

use std::path::Path;

use tracing::{debug, info};
use web_time::Instant;

use crate::error::Result;
use crate::forest::Forest;
use crate::tree::Tree;
use crate::types::VoxelFormat;

use super::{
  encode_cells, forest_cell_path, forest_sidecar_path, id_bytes, tree_blob_path,
  tree_section_layout, tree_sidecar_path, CellMeta, ForestSidecar, TreeMeta, TreeSidecar,
  FORMAT_VERSION, MAGIC,
};

/// Writes `P.bt` and `P.bt.json` with cells stored as f32.
pub fn write_tree(tree: &Tree, path: impl AsRef<Path>) -> Result<()> {
  write_tree_as(tree, path, VoxelFormat::default())
}

/// Writes `P.bt` and `P.bt.json` with cells encoded in `format`.
pub fn write_tree_as(tree: &Tree, path: impl AsRef<Path>, format: VoxelFormat) -> Result<()> {
  let base = path.as_ref();
  let blob = encode_tree_blob(tree, format);
  let sidecar = TreeSidecar {
    magic: MAGIC.to_string(),
    format_version: FORMAT_VERSION,
    tree: TreeMeta::describe(tree, format),
  };
  std::fs::write(tree_blob_path(base), &blob)?;
  // Sidecar last: its presence marks the blob as complete.
  std::fs::write(tree_sidecar_path(base), serde_json::to_vec_pretty(&sidecar)?)?;
  debug!(
    "Wrote tree {}: {} value bricks, {} bytes",
    base.display(),
    tree.value_brick_count(),
    blob.len()
  );
  Ok(())
}

/// Writes one `P-NNNNNN.bt` blob per grid cell and `P.btf.json` with cells
/// stored as f32.
pub fn write_forest(forest: &Forest, path: impl AsRef<Path>) -> Result<()> {
  write_forest_as(forest, path, VoxelFormat::default())
}

/// Writes one `P-NNNNNN.bt` blob per grid cell and `P.btf.json` with cells
/// encoded in `format`.
pub fn write_forest_as(forest: &Forest, path: impl AsRef<Path>, format: VoxelFormat) -> Result<()> {
  let base = path.as_ref();
  let started = Instant::now();
  let mut total_bytes = 0;
  let mut cells = Vec::with_capacity(forest.tree_count());
  for (cell_index, tree) in forest.trees().iter().enumerate() {
    let blob = encode_tree_blob(tree, format);
    std::fs::write(forest_cell_path(base, cell_index), &blob)?;
    total_bytes += blob.len();
    cells.push(CellMeta {
      average_value: tree.average(),
      value_range: tree.range(),
      valid_size: tree.valid_size().to_array(),
      index_bricks: tree.index_brick_count() as u64,
      value_bricks: tree.value_brick_count() as u64,
    });
  }
  let sidecar = ForestSidecar {
    magic: MAGIC.to_string(),
    format_version: FORMAT_VERSION,
    format: format.name().to_string(),
    brick_size: forest.layout().size(),
    depth: forest.depth(),
    grid_size: forest.grid_size().to_array(),
    block_width: forest.block_width(),
    valid_size: forest.valid_size().to_array(),
    average_value: forest.average(),
    value_range: forest.range(),
    cells,
  };
  std::fs::write(forest_sidecar_path(base), serde_json::to_vec_pretty(&sidecar)?)?;
  info!(
    "Wrote forest {}: {} trees, {} bytes in {:.1}ms",
    base.display(),
    forest.tree_count(),
    total_bytes,
    started.elapsed().as_secs_f64() * 1000.0
  );
  Ok(())
}

/// Encodes the three sections of one tree's blob.
fn encode_tree_blob(tree: &Tree, format: VoxelFormat) -> Vec<u8> {
  let sections = tree_section_layout(tree, format);
  let mut blob = Vec::with_capacity(sections.total_bytes as usize);
  blob.extend_from_slice(id_bytes(tree.index().children()));
  blob.extend_from_slice(&encode_cells(tree.values(), format));
  blob.extend_from_slice(id_bytes(tree.index().index_of()));
  debug_assert_eq!(blob.len() as u64, sections.total_bytes);
  blob
}
