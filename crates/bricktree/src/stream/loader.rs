//! Load queue plumbing: the request type, the per-blob brick reader, and
//! the background loader threads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use glam::UVec3;

use crate::error::Result;
use crate::format::decode_cells;
use crate::source::grid_index;
use crate::types::{BrickId, VoxelFormat};

use super::{service_request, StreamingForest, StreamingTree};

/// One queued brick fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRequest {
  /// Grid cell of the tree the brick belongs to.
  pub cell: UVec3,
  /// Value brick to load.
  pub brick: BrickId,
}

/// Reads value brick payloads out of one tree's blob.
///
/// The file stays open for the lifetime of the tree; every read seeks
/// within the value section only.
pub(crate) struct BrickReader {
  file: Mutex<File>,
  value_offset: u64,
  brick_bytes: usize,
  format: VoxelFormat,
}

impl BrickReader {
  pub(crate) fn new(file: File, value_offset: u64, format: VoxelFormat, cells: usize) -> Self {
    Self {
      file: Mutex::new(file),
      value_offset,
      brick_bytes: cells * format.bytes_per_value(),
      format,
    }
  }

  /// Reads one brick's cells, decoded to f32.
  pub(crate) fn read_brick(&self, brick: BrickId) -> Result<Box<[f32]>> {
    let mut bytes = vec![0u8; self.brick_bytes];
    {
      let mut file = self.file.lock().unwrap();
      let offset = self.value_offset + brick.index() as u64 * self.brick_bytes as u64;
      file.seek(SeekFrom::Start(offset))?;
      file.read_exact(&mut bytes)?;
    }
    Ok(decode_cells(&bytes, self.format).into_boxed_slice())
  }
}

/// Owns worker threads that drain a forest's load queue.
///
/// Dropping the loader (or calling [`BackgroundLoader::stop`]) signals the
/// workers and joins them; a brick already being read is finished first.
pub struct BackgroundLoader {
  stop: Arc<AtomicBool>,
  workers: Vec<JoinHandle<()>>,
}

impl BackgroundLoader {
  /// Spawns `workers` threads servicing `forest`'s queue. At least one
  /// worker is always started.
  pub(crate) fn spawn(forest: &StreamingForest, workers: usize) -> Self {
    let stop = Arc::new(AtomicBool::new(false));
    let workers = (0..workers.max(1))
      .map(|_| {
        let stop = Arc::clone(&stop);
        let requests = forest.requests().clone();
        let trees = forest.trees().to_vec();
        let grid = forest.grid_size();
        std::thread::spawn(move || worker_loop(&stop, &requests, &trees, grid))
      })
      .collect();
    Self { stop, workers }
  }

  /// Number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.workers.len()
  }

  /// Signals the workers and joins them.
  pub fn stop(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    self.stop.store(true, Ordering::Relaxed);
    for worker in self.workers.drain(..) {
      let _ = worker.join();
    }
  }
}

impl Drop for BackgroundLoader {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn worker_loop(
  stop: &AtomicBool,
  requests: &Receiver<LoadRequest>,
  trees: &[Arc<StreamingTree>],
  grid: UVec3,
) {
  // The timeout bounds how long a stop signal waits on an idle queue.
  while !stop.load(Ordering::Relaxed) {
    match requests.recv_timeout(Duration::from_millis(20)) {
      Ok(request) => {
        service_request(&trees[grid_index(grid, request.cell)], request);
      }
      Err(RecvTimeoutError::Timeout) => continue,
      Err(RecvTimeoutError::Disconnected) => break,
    }
  }
}
