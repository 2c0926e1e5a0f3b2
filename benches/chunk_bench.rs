//! Benchmarks for deduprs chunking.
//!
//! Run with:
//!     cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use deduprs::{ChunkConfig, Chunker};

fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x853c49e6748fea9b;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 56) as u8
        })
        .collect()
}

fn bench_chunker(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunker");

    for size in [64 * 1024, 1024 * 1024, 10 * 1024 * 1024] {
        let data = pseudo_random(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            format!("random_{}kb", size / 1024),
            &data,
            |b, data| {
                let chunker = Chunker::new(ChunkConfig::default());
                b.iter(|| {
                    let chunks = chunker.chunk_bytes(black_box(data.clone())).unwrap();
                    black_box(chunks.len())
                });
            },
        );

        // All zeros: no content boundary ever fires, every cut is the cap.
        let zeros = vec![0u8; size];
        group.bench_with_input(format!("zeros_{}kb", size / 1024), &zeros, |b, data| {
            let chunker = Chunker::new(ChunkConfig::default());
            b.iter(|| {
                let chunks = chunker.chunk_bytes(black_box(data.clone())).unwrap();
                black_box(chunks.len())
            });
        });
    }

    group.finish();
}

fn bench_configs(c: &mut Criterion) {
    let mut group = c.benchmark_group("configs");
    let data = pseudo_random(1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for (label, min, max, shift, check) in [
        ("fine_128_1k", 128usize, 1024usize, 64usize, 1usize),
        ("default_4k_64k", 4096, 65536, 64, 1),
        ("wide_shift_4k_64k", 4096, 65536, 512, 1),
    ] {
        let config = ChunkConfig::new(min, max, shift, check).unwrap();
        group.bench_with_input(label, &data, |b, data| {
            let chunker = Chunker::new(config);
            b.iter(|| {
                let chunks = chunker.chunk_bytes(black_box(data.clone())).unwrap();
                black_box(chunks.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunker, bench_configs);
criterion_main!(benches);
