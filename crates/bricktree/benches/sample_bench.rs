//! Benchmarks for tree construction and queries over a 64³ volume.
//!
//! The workload is a sphere's signed distance field: flat far field that
//! prunes away, detail concentrated in the shell around the surface.

use bricktree::{build_tree, ArraySource, BuildConfig, Threshold};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use glam::{IVec3, UVec3, Vec3};

const VOLUME_SIZE: u32 = 64;

fn sphere_source() -> ArraySource {
  let center = VOLUME_SIZE as f32 / 2.0;
  let radius = VOLUME_SIZE as f32 / 4.0;
  ArraySource::from_fn(UVec3::splat(VOLUME_SIZE), |c| {
    (c.as_vec3() - center).length() - radius
  })
}

fn tree_for(threshold: Threshold) -> bricktree::Tree {
  let config = BuildConfig::new().with_brick_size(8).with_threshold(threshold);
  build_tree(&sphere_source(), &config).unwrap()
}

/// Full 64³ build at both ends of the pruning spectrum.
fn bench_build(c: &mut Criterion) {
  let mut group = c.benchmark_group("build_64");
  group.throughput(Throughput::Elements((VOLUME_SIZE as u64).pow(3)));

  let source = sphere_source();
  for (name, threshold) in [
    ("lossless", Threshold::LOSSLESS),
    ("pruned", Threshold::Absolute(0.5)),
  ] {
    let config = BuildConfig::new().with_brick_size(8).with_threshold(threshold);
    group.bench_function(name, |b| {
      b.iter(|| black_box(build_tree(&source, &config).unwrap()))
    });
  }

  group.finish();
}

/// Point lookups over every voxel of the volume.
fn bench_find_value(c: &mut Criterion) {
  let mut group = c.benchmark_group("find_value_64");
  group.throughput(Throughput::Elements((VOLUME_SIZE as u64).pow(3)));

  for (name, threshold) in [
    ("lossless", Threshold::LOSSLESS),
    ("pruned", Threshold::Absolute(0.5)),
  ] {
    let tree = tree_for(threshold);
    group.bench_function(name, |b| {
      b.iter(|| {
        let mut acc = 0.0f32;
        for x in 0..VOLUME_SIZE as i32 {
          for y in 0..VOLUME_SIZE as i32 {
            for z in 0..VOLUME_SIZE as i32 {
              acc += tree.find_value(IVec3::new(x, y, z));
            }
          }
        }
        black_box(acc)
      })
    });
  }

  group.finish();
}

/// Trilinear samples at off-lattice positions (8 lookups each).
fn bench_sample(c: &mut Criterion) {
  let mut group = c.benchmark_group("sample_64");
  let probes = VOLUME_SIZE / 2;
  group.throughput(Throughput::Elements((probes as u64).pow(3)));

  for (name, threshold) in [
    ("lossless", Threshold::LOSSLESS),
    ("pruned", Threshold::Absolute(0.5)),
  ] {
    let tree = tree_for(threshold);
    group.bench_function(name, |b| {
      b.iter(|| {
        let mut acc = 0.0f32;
        for x in 0..probes {
          for y in 0..probes {
            for z in 0..probes {
              let pos = Vec3::new(x as f32, y as f32, z as f32) * 2.0 + 0.3;
              acc += tree.sample(pos);
            }
          }
        }
        black_box(acc)
      })
    });
  }

  group.finish();
}

criterion_group!(benches, bench_build, bench_find_value, bench_sample);
criterion_main!(benches);
