use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vellum::cache::Cache;

const SIZES: [usize; 3] = [1024, 64 * 1024, 512 * 1024];

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put_get");
    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("put_then_get", size), &size, |b, &size| {
            let cache = Cache::new(16 * 1024 * 1024, 1024 * 1024);
            let payload = vec![0u8; size];
            let mut i = 0usize;
            b.iter(|| {
                let key = PathBuf::from(format!("/bench/{i}"));
                i += 1;
                cache.put(&key, black_box(payload.clone())).unwrap();
                black_box(cache.get(&key));
            });
        });
    }
    group.finish();

    c.bench_function("cache_hit_on_resident_entry", |b| {
        let cache = Cache::new(16 * 1024 * 1024, 1024 * 1024);
        let key = PathBuf::from("/bench/resident");
        cache.put(&key, vec![0u8; 4096]).unwrap();
        b.iter(|| black_box(cache.get(black_box(&key))));
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
