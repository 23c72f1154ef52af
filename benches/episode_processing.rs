//! Benchmarks for episode processing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array2, Array3};
use teleop_rec::analysis::analyze;
use teleop_rec::collector::ActionTracker;
use teleop_rec::storage::{Codec, GzipCodec, PersistedEpisode, RawCodec};
use teleop_rec::transforms::{batch_relative_poses, relative_action, FrameAlignment};
use teleop_rec::types::PoseState;

fn pose(i: usize) -> PoseState {
    let t = i as f64 * 0.05;
    [
        0.1 * t,
        0.05 * t.sin(),
        0.3,
        0.01 * t,
        -0.02 * t,
        0.2 * t.cos(),
        0.5,
    ]
}

fn bench_relative_action(c: &mut Criterion) {
    let reference = pose(0);
    let current = pose(100);

    c.bench_function("relative_action", |b| {
        b.iter(|| black_box(relative_action(black_box(&current), black_box(&reference))));
    });

    let mut group = c.benchmark_group("action_tracker");
    for alignment in [FrameAlignment::None, FrameAlignment::Clockwise] {
        group.bench_with_input(
            BenchmarkId::new("derive", alignment),
            &alignment,
            |b, &alignment| {
                let mut tracker = ActionTracker::new(alignment);
                tracker.derive(&reference);
                b.iter(|| black_box(tracker.derive(black_box(&current))));
            },
        );
    }
    group.finish();
}

fn bench_batch_relative_poses(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_relative_poses");

    for size in [100, 1000, 10_000].iter() {
        let poses = Array2::from_shape_fn((*size, 7), |(i, j)| pose(i)[j]);
        let reference = pose(0);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &poses, |b, poses| {
            b.iter(|| black_box(batch_relative_poses(poses.view(), &reference)));
        });
    }

    group.finish();
}

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    // One 480×480 gradient frame, the default camera resolution
    let image = Array3::from_shape_fn((480, 480, 3), |(y, x, ch)| ((x + y + ch * 85) % 256) as u8);
    let raw = image.as_slice().map(<[u8]>::to_vec).unwrap_or_default();
    group.throughput(Throughput::Bytes(raw.len() as u64));

    let codecs: [(&str, Box<dyn Codec>); 3] = [
        ("raw", Box::new(RawCodec)),
        ("gzip_1", Box::new(GzipCodec::new(1))),
        ("gzip_4", Box::new(GzipCodec::new(4))),
    ];
    for (name, codec) in codecs.iter() {
        group.bench_with_input(BenchmarkId::new("encode", name), &raw, |b, raw| {
            b.iter(|| black_box(codec.encode(raw)));
        });

        let encoded = codec.encode(&raw).unwrap_or_default();
        group.bench_with_input(BenchmarkId::new("decode", name), &encoded, |b, encoded| {
            b.iter(|| black_box(codec.decode(encoded, raw.len())));
        });
    }

    group.finish();
}

fn bench_analysis(c: &mut Criterion) {
    let n = 10_000;
    let episode = PersistedEpisode {
        timestamp: (0..n).map(|i| i as f64 * 0.05).collect(),
        timestamp_pose: (0..n).map(|i| i as f64 * 0.05 + 0.002).collect(),
        timestamp_force: (0..n).map(|i| i as f64 * 0.05 + 0.004).collect(),
        ..Default::default()
    };

    c.bench_function("analyze_10k_frames", |b| {
        b.iter(|| black_box(analyze(black_box(&episode))));
    });
}

criterion_group!(
    benches,
    bench_relative_action,
    bench_batch_relative_poses,
    bench_codecs,
    bench_analysis,
);

criterion_main!(benches);
