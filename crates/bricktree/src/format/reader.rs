//! Deserializes trees and forests, eagerly or for streaming.
//!
//! Eager opens pull every section into memory. Streaming opens read only
//! the topology sections and keep the file handle for on-demand value
//! brick reads. Both validate the sidecar against the blob before
//! touching any payload.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Sender;
use glam::UVec3;
use tracing::{debug, info};
use web_time::Instant;

use crate::builder::TreeStats;
use crate::error::Result;
use crate::forest::Forest;
use crate::layout::BrickLayout;
use crate::stream::{BrickReader, LoadRequest, StreamingForest, StreamingTree};
use crate::tree::{Tree, TreeIndex};
use crate::types::VoxelFormat;

use super::{
  check_blob_len, check_header, decode_cells, decode_ids, forest_cell_path, forest_sidecar_path,
  section_mismatch, tree_blob_path, tree_sidecar_path, ForestSidecar, SectionLayout, TreeSidecar,
};

/// Opens `P.bt` + `P.bt.json` with every value brick resident.
pub fn open_tree(path: impl AsRef<Path>) -> Result<Tree> {
  let base = path.as_ref();
  let sidecar = load_tree_sidecar(&tree_sidecar_path(base))?;
  let meta = &sidecar.tree;
  let blob_path = tree_blob_path(base);
  let (layout, format, sections) = meta.validate(&blob_path)?;
  let stats = TreeStats {
    average: meta.average_value,
    range: meta.value_range,
    valid_size: UVec3::from_array(meta.valid_size),
  };
  let tree = read_tree_blob(&blob_path, layout, format, meta.depth, sections, stats)?;
  debug!(
    "Opened tree {}: {} value bricks",
    base.display(),
    tree.value_brick_count()
  );
  Ok(tree)
}

/// Opens `P.btf.json` + per-cell blobs with every tree resident.
pub fn open_forest(path: impl AsRef<Path>) -> Result<Forest> {
  let base = path.as_ref();
  let started = Instant::now();
  let sidecar_path = forest_sidecar_path(base);
  let sidecar = load_forest_sidecar(&sidecar_path)?;
  let (layout, format) = sidecar.validate(&sidecar_path)?;
  let mut trees = Vec::with_capacity(sidecar.cells.len());
  for (cell_index, cell) in sidecar.cells.iter().enumerate() {
    let blob_path = forest_cell_path(base, cell_index);
    let sections = cell.validate(layout, format, sidecar.block_width, &blob_path)?;
    let stats = TreeStats {
      average: cell.average_value,
      range: cell.value_range,
      valid_size: UVec3::from_array(cell.valid_size),
    };
    trees.push(read_tree_blob(&blob_path, layout, format, sidecar.depth, sections, stats)?);
  }
  let forest = Forest::new(
    layout,
    sidecar.depth,
    UVec3::from_array(sidecar.grid_size),
    UVec3::from_array(sidecar.valid_size),
    sidecar.average_value,
    sidecar.value_range,
    trees,
  );
  info!(
    "Opened forest {}: {} trees in {:.1}ms",
    base.display(),
    forest.tree_count(),
    started.elapsed().as_secs_f64() * 1000.0
  );
  Ok(forest)
}

/// Opens a single tree for streaming. The result is a one-cell forest, so
/// streaming callers deal with one type regardless of how data was built.
pub fn open_tree_streaming(path: impl AsRef<Path>) -> Result<StreamingForest> {
  let base = path.as_ref();
  let sidecar = load_tree_sidecar(&tree_sidecar_path(base))?;
  let meta = &sidecar.tree;
  let blob_path = tree_blob_path(base);
  let (layout, format, sections) = meta.validate(&blob_path)?;
  let stats = TreeStats {
    average: meta.average_value,
    range: meta.value_range,
    valid_size: UVec3::from_array(meta.valid_size),
  };
  let (sender, receiver) = crossbeam_channel::unbounded();
  let tree = open_streaming_tree(
    &blob_path,
    layout,
    format,
    meta.depth,
    sections,
    stats,
    UVec3::ZERO,
    sender,
  )?;
  debug!(
    "Opened tree {} for streaming: {} value bricks on disk",
    base.display(),
    tree.index().value_brick_count()
  );
  Ok(StreamingForest::new(
    layout,
    meta.depth,
    UVec3::ONE,
    UVec3::from_array(meta.valid_size),
    meta.average_value,
    meta.value_range,
    vec![Arc::new(tree)],
    receiver,
  ))
}

/// Opens a forest for streaming: topology resident, value bricks loaded
/// on demand through one shared request queue.
pub fn open_forest_streaming(path: impl AsRef<Path>) -> Result<StreamingForest> {
  let base = path.as_ref();
  let started = Instant::now();
  let sidecar_path = forest_sidecar_path(base);
  let sidecar = load_forest_sidecar(&sidecar_path)?;
  let (layout, format) = sidecar.validate(&sidecar_path)?;
  let grid = UVec3::from_array(sidecar.grid_size);
  let (sender, receiver) = crossbeam_channel::unbounded();
  let mut trees = Vec::with_capacity(sidecar.cells.len());
  for (cell_index, cell) in sidecar.cells.iter().enumerate() {
    let blob_path = forest_cell_path(base, cell_index);
    let sections = cell.validate(layout, format, sidecar.block_width, &blob_path)?;
    let stats = TreeStats {
      average: cell.average_value,
      range: cell.value_range,
      valid_size: UVec3::from_array(cell.valid_size),
    };
    let grid_cell = linear_cell(grid, cell_index);
    let tree = open_streaming_tree(
      &blob_path,
      layout,
      format,
      sidecar.depth,
      sections,
      stats,
      grid_cell,
      sender.clone(),
    )?;
    trees.push(Arc::new(tree));
  }
  info!(
    "Opened forest {} for streaming: {} trees in {:.1}ms",
    base.display(),
    trees.len(),
    started.elapsed().as_secs_f64() * 1000.0
  );
  Ok(StreamingForest::new(
    layout,
    sidecar.depth,
    grid,
    UVec3::from_array(sidecar.valid_size),
    sidecar.average_value,
    sidecar.value_range,
    trees,
    receiver,
  ))
}

fn load_tree_sidecar(path: &Path) -> Result<TreeSidecar> {
  let bytes = std::fs::read(path)?;
  let sidecar: TreeSidecar = serde_json::from_slice(&bytes)?;
  check_header(path, &sidecar.magic, sidecar.format_version)?;
  Ok(sidecar)
}

fn load_forest_sidecar(path: &Path) -> Result<ForestSidecar> {
  let bytes = std::fs::read(path)?;
  let sidecar: ForestSidecar = serde_json::from_slice(&bytes)?;
  check_header(path, &sidecar.magic, sidecar.format_version)?;
  Ok(sidecar)
}

/// Grid cell of a linear blob index, inverting the x-major z-minor order.
fn linear_cell(grid: UVec3, index: usize) -> UVec3 {
  let index = index as u32;
  UVec3::new(
    index / (grid.y * grid.z),
    index / grid.z % grid.y,
    index % grid.z,
  )
}

/// Reads one fully-resident tree out of its blob.
fn read_tree_blob(
  blob_path: &Path,
  layout: BrickLayout,
  format: VoxelFormat,
  depth: u32,
  sections: SectionLayout,
  stats: TreeStats,
) -> Result<Tree> {
  check_blob_len(blob_path, sections.total_bytes)?;
  let blob = std::fs::read(blob_path)?;
  let index = build_index(
    blob_path,
    layout,
    depth,
    &blob[..sections.value_offset as usize],
    &blob[sections.info_offset as usize..],
  )?;
  let values = decode_cells(
    &blob[sections.value_offset as usize..sections.info_offset as usize],
    format,
  );
  Ok(Tree::new(index, values, stats.average, stats.range, stats.valid_size))
}

/// Reads only the topology sections and wraps the open file for
/// on-demand value brick reads.
#[allow(clippy::too_many_arguments)]
fn open_streaming_tree(
  blob_path: &Path,
  layout: BrickLayout,
  format: VoxelFormat,
  depth: u32,
  sections: SectionLayout,
  stats: TreeStats,
  cell: UVec3,
  requests: Sender<LoadRequest>,
) -> Result<StreamingTree> {
  check_blob_len(blob_path, sections.total_bytes)?;
  let mut file = File::open(blob_path)?;
  let children_bytes = read_exact_at(
    &mut file,
    sections.index_offset,
    (sections.value_offset - sections.index_offset) as usize,
  )?;
  let info_bytes = read_exact_at(
    &mut file,
    sections.info_offset,
    (sections.total_bytes - sections.info_offset) as usize,
  )?;
  let index = build_index(blob_path, layout, depth, &children_bytes, &info_bytes)?;
  let reader = BrickReader::new(file, sections.value_offset, format, layout.cells());
  Ok(StreamingTree::new(
    index,
    stats.average,
    stats.range,
    stats.valid_size,
    reader,
    cell,
    requests,
  ))
}

/// Decodes and bounds-checks the two topology sections.
fn build_index(
  blob: &Path,
  layout: BrickLayout,
  depth: u32,
  children_bytes: &[u8],
  info_bytes: &[u8],
) -> Result<TreeIndex> {
  let children = decode_ids(children_bytes);
  let index_of = decode_ids(info_bytes);
  let value_bricks = index_of.len();
  let index_bricks = children.len() / layout.cells();
  for &child in &children {
    if child.is_valid() && child.index() >= value_bricks {
      return Err(section_mismatch(
        blob,
        format!(
          "child id {} out of range ({value_bricks} value bricks)",
          child.raw()
        ),
      ));
    }
  }
  for &index_brick in &index_of {
    if index_brick.is_valid() && index_brick.index() >= index_bricks {
      return Err(section_mismatch(
        blob,
        format!(
          "index brick id {} out of range ({index_bricks} index bricks)",
          index_brick.raw()
        ),
      ));
    }
  }
  Ok(TreeIndex::new(layout, depth, children, index_of))
}

fn read_exact_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
  file.seek(SeekFrom::Start(offset))?;
  let mut bytes = vec![0u8; len];
  file.read_exact(&mut bytes)?;
  Ok(bytes)
}
