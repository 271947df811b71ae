//! On-disk format: binary brick blobs plus JSON sidecars.
//!
//! A blob is three back-to-back little-endian sections with no header:
//!
//! ```text
//! index bricks   count_i x N³ x u32    child ids, -1 = no child
//! value bricks   count_v x N³ x cell   cells in the sidecar's format
//! brick info     count_v x i32         index brick per value brick, -1 = none
//! ```
//!
//! Everything needed to slice a blob lives in its sidecar, so the blob
//! itself stays seekable for streaming readers. Writers emit every blob
//! first and the sidecar last; a present sidecar therefore marks a
//! complete set of files.
//!
//! File naming from a base path `P`:
//!
//! ```text
//! single tree   P.bt          P.bt.json
//! forest        P-000000.bt   P.btf.json     one blob per grid cell,
//!               P-000001.bt                  zero-padded linear index
//!               ...
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::BrickLayout;
use crate::tree::Tree;
use crate::types::{BrickId, ValueRange, VoxelFormat, VoxelScalar};

mod reader;
mod writer;

pub use reader::{open_forest, open_forest_streaming, open_tree, open_tree_streaming};
pub use writer::{write_forest, write_forest_as, write_tree, write_tree_as};

/// Identifies sidecar documents written by this crate.
pub const MAGIC: &str = "bricktree";

/// Bumped when the blob layout or sidecar schema changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Element count and byte offset of one blob section.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub(crate) struct SectionMeta {
  pub count: u64,
  pub byte_offset: u64,
}

/// Sidecar body describing one tree and its blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TreeMeta {
  pub average_value: f32,
  pub value_range: ValueRange,
  /// Cell encoding name: `uint8`, `float` or `double`.
  pub format: String,
  pub brick_size: u32,
  pub valid_size: [u32; 3],
  pub depth: u32,
  pub index_bricks: SectionMeta,
  pub value_bricks: SectionMeta,
  pub brick_info: SectionMeta,
}

/// Sidecar document of a single tree (`P.bt.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TreeSidecar {
  pub magic: String,
  pub format_version: u32,
  pub tree: TreeMeta,
}

/// Brick counts and stats of one forest cell. Section offsets within the
/// cell's blob follow from the counts alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct CellMeta {
  pub average_value: f32,
  pub value_range: ValueRange,
  pub valid_size: [u32; 3],
  pub index_bricks: u64,
  pub value_bricks: u64,
}

/// Sidecar document of a forest (`P.btf.json`). Cells are listed in
/// x-major, z-minor linear grid order, matching the blob numbering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ForestSidecar {
  pub magic: String,
  pub format_version: u32,
  pub format: String,
  pub brick_size: u32,
  pub depth: u32,
  pub grid_size: [u32; 3],
  pub block_width: u64,
  pub valid_size: [u32; 3],
  pub average_value: f32,
  pub value_range: ValueRange,
  pub cells: Vec<CellMeta>,
}

/// Byte offsets of the three sections of one blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SectionLayout {
  pub index_offset: u64,
  pub value_offset: u64,
  pub info_offset: u64,
  pub total_bytes: u64,
}

/// Computes section offsets from sidecar-declared brick counts. `cells`
/// is N³ for the blob's brick size. The counts are untrusted input, so
/// the arithmetic is checked; `None` means no blob of that shape can
/// exist and validation reports the counts as inconsistent.
pub(crate) fn section_layout(
  cells: usize,
  format: VoxelFormat,
  index_bricks: u64,
  value_bricks: u64,
) -> Option<SectionLayout> {
  let index_bytes = index_bricks.checked_mul(cells as u64 * 4)?;
  let value_bytes = value_bricks.checked_mul(cells as u64 * format.bytes_per_value() as u64)?;
  let info_bytes = value_bricks.checked_mul(4)?;
  let info_offset = index_bytes.checked_add(value_bytes)?;
  Some(SectionLayout {
    index_offset: 0,
    value_offset: index_bytes,
    info_offset,
    total_bytes: info_offset.checked_add(info_bytes)?,
  })
}

/// Section offsets of a resident tree's blob, from its arena lengths.
pub(crate) fn tree_section_layout(tree: &Tree, format: VoxelFormat) -> SectionLayout {
  let index_bytes = tree.index().children().len() as u64 * 4;
  let value_bytes = tree.values().len() as u64 * format.bytes_per_value() as u64;
  let info_bytes = tree.index().index_of().len() as u64 * 4;
  SectionLayout {
    index_offset: 0,
    value_offset: index_bytes,
    info_offset: index_bytes + value_bytes,
    total_bytes: index_bytes + value_bytes + info_bytes,
  }
}

impl TreeMeta {
  pub(crate) fn describe(tree: &Tree, format: VoxelFormat) -> Self {
    let sections = tree_section_layout(tree, format);
    TreeMeta {
      average_value: tree.average(),
      value_range: tree.range(),
      format: format.name().to_string(),
      brick_size: tree.layout().size(),
      valid_size: tree.valid_size().to_array(),
      depth: tree.depth(),
      index_bricks: SectionMeta {
        count: tree.index_brick_count() as u64,
        byte_offset: sections.index_offset,
      },
      value_bricks: SectionMeta {
        count: tree.value_brick_count() as u64,
        byte_offset: sections.value_offset,
      },
      brick_info: SectionMeta {
        count: tree.value_brick_count() as u64,
        byte_offset: sections.info_offset,
      },
    }
  }

  /// Checks internal consistency and resolves the layout, format and
  /// canonical section offsets. `blob` names the data file in errors.
  pub(crate) fn validate(&self, blob: &Path) -> Result<(BrickLayout, VoxelFormat, SectionLayout)> {
    let layout = BrickLayout::new(self.brick_size)?;
    let format = VoxelFormat::parse(&self.format)
      .ok_or_else(|| Error::UnsupportedVoxelFormat(self.format.clone()))?;
    if self.depth < 1 || self.depth > layout.max_depth() {
      return Err(section_mismatch(
        blob,
        format!(
          "depth {} out of range for {}-wide bricks",
          self.depth, self.brick_size
        ),
      ));
    }
    let block_width = layout.block_width(self.depth);
    if self.valid_size.iter().any(|&extent| extent as u64 > block_width) {
      return Err(section_mismatch(
        blob,
        format!(
          "valid size {:?} exceeds the block width {block_width}",
          self.valid_size
        ),
      ));
    }
    if self.value_bricks.count == 0 {
      return Err(section_mismatch(blob, "no value bricks (the root must exist)"));
    }
    if self.brick_info.count != self.value_bricks.count {
      return Err(section_mismatch(
        blob,
        format!(
          "brick info count {} does not match value brick count {}",
          self.brick_info.count, self.value_bricks.count
        ),
      ));
    }
    let sections = section_layout(
      layout.cells(),
      format,
      self.index_bricks.count,
      self.value_bricks.count,
    )
    .ok_or_else(|| section_mismatch(blob, "declared brick counts overflow the blob size"))?;
    let declared = [
      ("index brick", self.index_bricks.byte_offset, sections.index_offset),
      ("value brick", self.value_bricks.byte_offset, sections.value_offset),
      ("brick info", self.brick_info.byte_offset, sections.info_offset),
    ];
    for (name, offset, expected) in declared {
      if offset != expected {
        return Err(section_mismatch(
          blob,
          format!("{name} section at byte {offset}, counts place it at {expected}"),
        ));
      }
    }
    Ok((layout, format, sections))
  }
}

impl CellMeta {
  /// Checks one forest cell's record and resolves its blob's section
  /// offsets. `block_width` bounds the cell's valid size.
  pub(crate) fn validate(
    &self,
    layout: BrickLayout,
    format: VoxelFormat,
    block_width: u64,
    blob: &Path,
  ) -> Result<SectionLayout> {
    if self.value_bricks == 0 {
      return Err(section_mismatch(blob, "no value bricks (the root must exist)"));
    }
    if self.valid_size.iter().any(|&extent| extent as u64 > block_width) {
      return Err(section_mismatch(
        blob,
        format!(
          "valid size {:?} exceeds the block width {block_width}",
          self.valid_size
        ),
      ));
    }
    section_layout(layout.cells(), format, self.index_bricks, self.value_bricks)
      .ok_or_else(|| section_mismatch(blob, "declared brick counts overflow the blob size"))
  }
}

impl ForestSidecar {
  /// Checks forest-level consistency and resolves the layout and format.
  pub(crate) fn validate(&self, path: &Path) -> Result<(BrickLayout, VoxelFormat)> {
    let layout = BrickLayout::new(self.brick_size)?;
    let format = VoxelFormat::parse(&self.format)
      .ok_or_else(|| Error::UnsupportedVoxelFormat(self.format.clone()))?;
    if self.depth < 1 || self.depth > layout.max_depth() {
      return Err(section_mismatch(
        path,
        format!(
          "depth {} out of range for {}-wide bricks",
          self.depth, self.brick_size
        ),
      ));
    }
    if self.block_width != layout.block_width(self.depth) {
      return Err(section_mismatch(
        path,
        format!(
          "block width {} does not match brick size {} at depth {}",
          self.block_width, self.brick_size, self.depth
        ),
      ));
    }
    if self.grid_size.iter().any(|&extent| extent == 0) {
      return Err(section_mismatch(path, "empty grid"));
    }
    let cells =
      self.grid_size[0] as u64 * self.grid_size[1] as u64 * self.grid_size[2] as u64;
    if cells > crate::builder::MAX_ROOT_CELLS {
      return Err(Error::RootGridTooLarge {
        cells,
        max: crate::builder::MAX_ROOT_CELLS,
      });
    }
    if cells != self.cells.len() as u64 {
      return Err(section_mismatch(
        path,
        format!(
          "grid {:?} has {cells} cells, sidecar lists {}",
          self.grid_size,
          self.cells.len()
        ),
      ));
    }
    Ok((layout, format))
  }
}

pub(crate) fn section_mismatch(path: &Path, detail: impl Into<String>) -> Error {
  Error::SectionMismatch {
    path: path.to_path_buf(),
    detail: detail.into(),
  }
}

/// Rejects sidecars written by other tools or incompatible versions.
pub(crate) fn check_header(path: &Path, magic: &str, version: u32) -> Result<()> {
  if magic != MAGIC {
    return Err(Error::BadMagic {
      path: path.to_path_buf(),
      magic: magic.to_string(),
    });
  }
  if version != FORMAT_VERSION {
    return Err(Error::BadVersion {
      found: version,
      supported: FORMAT_VERSION,
    });
  }
  Ok(())
}

/// Checks a blob's size against the total of its sections. Shorter files
/// are truncated; longer files do not match their sidecar.
pub(crate) fn check_blob_len(path: &Path, expected: u64) -> Result<()> {
  let found = std::fs::metadata(path)?.len();
  if found < expected {
    return Err(Error::Truncated {
      path: path.to_path_buf(),
      expected,
      found,
    });
  }
  if found > expected {
    return Err(section_mismatch(
      path,
      format!("{found} bytes on disk, sections cover {expected}"),
    ));
  }
  Ok(())
}

pub(crate) fn tree_blob_path(base: &Path) -> PathBuf {
  append_suffix(base, ".bt")
}

pub(crate) fn tree_sidecar_path(base: &Path) -> PathBuf {
  append_suffix(base, ".bt.json")
}

pub(crate) fn forest_sidecar_path(base: &Path) -> PathBuf {
  append_suffix(base, ".btf.json")
}

pub(crate) fn forest_cell_path(base: &Path, cell_index: usize) -> PathBuf {
  append_suffix(base, &format!("-{cell_index:06}.bt"))
}

/// Appends to the file name as-is; `Path::with_extension` would clobber
/// anything after a dot in the base name.
fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
  let mut name = base.as_os_str().to_os_string();
  name.push(suffix);
  PathBuf::from(name)
}

/// Reinterprets brick ids as their on-disk bytes. INVALID keeps its
/// `0xFFFF_FFFF` pattern, which reads back as int32 -1.
pub(crate) fn id_bytes(ids: &[BrickId]) -> &[u8] {
  bytemuck::cast_slice(ids)
}

pub(crate) fn decode_ids(bytes: &[u8]) -> Vec<BrickId> {
  let mut ids = vec![BrickId::INVALID; bytes.len() / 4];
  bytemuck::cast_slice_mut::<BrickId, u8>(&mut ids).copy_from_slice(bytes);
  ids
}

/// Encodes f32 cells into the blob's value format.
pub(crate) fn encode_cells(values: &[f32], format: VoxelFormat) -> Vec<u8> {
  match format {
    VoxelFormat::Uint8 => encode_cells_as::<u8>(values),
    VoxelFormat::Float32 => encode_cells_as::<f32>(values),
    VoxelFormat::Float64 => encode_cells_as::<f64>(values),
  }
}

fn encode_cells_as<T: VoxelScalar>(values: &[f32]) -> Vec<u8> {
  let encoded: Vec<T> = values.iter().map(|&value| T::from_f32(value)).collect();
  bytemuck::cast_slice(&encoded).to_vec()
}

/// Decodes a value section (or a single brick of it) back to f32 cells.
pub(crate) fn decode_cells(bytes: &[u8], format: VoxelFormat) -> Vec<f32> {
  match format {
    VoxelFormat::Uint8 => decode_cells_as::<u8>(bytes),
    VoxelFormat::Float32 => decode_cells_as::<f32>(bytes),
    VoxelFormat::Float64 => decode_cells_as::<f64>(bytes),
  }
}

fn decode_cells_as<T: VoxelScalar>(bytes: &[u8]) -> Vec<f32> {
  // Copy through an aligned Vec<T>; the byte slice may not be aligned.
  let mut scalars = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
  bytemuck::cast_slice_mut::<T, u8>(&mut scalars).copy_from_slice(bytes);
  scalars.into_iter().map(T::to_f32).collect()
}
