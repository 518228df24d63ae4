use blobstore::{Bitset, Blobstore, MemoryDevice};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_first_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitset_first_fit");

    // Allocation cost grows with how much of the front is already taken
    for filled in [0usize, 50, 90, 99] {
        let capacity = 1 << 16;
        let mut base = Bitset::new(capacity).unwrap();
        for i in 0..capacity * filled / 100 {
            base.set(i, true);
        }

        group.bench_with_input(BenchmarkId::new("alloc_64", filled), &base, |b, base| {
            b.iter(|| {
                let mut bitset = base.clone();
                black_box(bitset.alloc(64).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_create_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("blobstore");

    for n_clusters in [1u32, 512, 4096] {
        group.bench_with_input(
            BenchmarkId::new("create_delete", n_clusters),
            &n_clusters,
            |b, &n| {
                let mut store = Blobstore::init(MemoryDevice::new(64 << 20, 4096)).unwrap();
                b.iter(|| {
                    let id = store.create_blob(n).unwrap();
                    store.delete_blob(id).unwrap();
                });
            },
        );
    }

    group.bench_function("open_100_blobs", |b| {
        let mut device = MemoryDevice::new(64 << 20, 4096);
        {
            let mut store = Blobstore::init(&mut device).unwrap();
            for i in 0..100 {
                store.create_blob(i + 1).unwrap();
            }
        }
        b.iter(|| black_box(Blobstore::open(&mut device).unwrap().blobs().len()));
    });

    group.finish();
}

criterion_group!(benches, bench_first_fit, bench_create_delete);
criterion_main!(benches);
