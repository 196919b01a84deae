//! Merge throughput benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chunkyard_engine::*;

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(10);

    for &(chunks, chunk_size) in &[(16usize, 64 * 1024usize), (64, 256 * 1024), (8, 4 * 1024 * 1024)] {
        let payload = vec![0xA5u8; chunk_size];
        group.throughput(Throughput::Bytes((chunks * chunk_size) as u64));

        group.bench_with_input(
            BenchmarkId::new("fs", format!("{}x{}KiB", chunks, chunk_size / 1024)),
            &chunks,
            |b, &chunks| {
                let (chunkyard, _temp) = Chunkyard::temp().unwrap();
                b.iter(|| {
                    for i in 0..chunks {
                        chunkyard
                            .receive(Some("bench"), Some(&i.to_string()), &payload)
                            .unwrap();
                    }
                    black_box(chunkyard.merge(Some("bench"), Some("bench.bin"), None).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
