//! Codec and volume history benchmarks
//!
//! ```bash
//! cargo bench --bench codec
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use child_monitor::codec::{AudioCodec, MuLawCodec};
use child_monitor::constants::{CAPTURE_CHUNK_SAMPLES, READ_BUFFER_BYTES, VOLUME_HISTORY_CAPACITY};
use child_monitor::volume::VolumeHistory;

fn test_signal(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| ((i as f32 * 0.05).sin() * 12_000.0) as i16)
        .collect()
}

fn bench_mulaw(c: &mut Criterion) {
    let mut group = c.benchmark_group("mulaw");

    let pcm = test_signal(CAPTURE_CHUNK_SAMPLES);
    group.throughput(Throughput::Elements(pcm.len() as u64));
    group.bench_function("encode_chunk", |b| {
        let mut codec = MuLawCodec::new();
        b.iter(|| codec.encode(black_box(&pcm)));
    });

    let encoded = MuLawCodec::new().encode(&test_signal(READ_BUFFER_BYTES));
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("decode_read_buffer", |b| {
        let mut codec = MuLawCodec::new();
        let mut out = Vec::with_capacity(encoded.len());
        b.iter(|| codec.decode(black_box(&encoded), &mut out));
    });

    group.finish();
}

fn bench_volume_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("volume_history");
    let chunk = test_signal(READ_BUFFER_BYTES);

    group.bench_function("append_full", |b| {
        let history = VolumeHistory::new(VOLUME_HISTORY_CAPACITY);
        for _ in 0..VOLUME_HISTORY_CAPACITY {
            history.append(&chunk);
        }
        b.iter(|| history.append(black_box(&chunk)));
    });

    let history = VolumeHistory::new(VOLUME_HISTORY_CAPACITY);
    for _ in 0..VOLUME_HISTORY_CAPACITY {
        history.append(&chunk);
    }
    for count in [512, VOLUME_HISTORY_CAPACITY] {
        group.bench_with_input(BenchmarkId::new("recent", count), &count, |b, &count| {
            b.iter(|| history.recent(black_box(count)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mulaw, bench_volume_history);
criterion_main!(benches);
