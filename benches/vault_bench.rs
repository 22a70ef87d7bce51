use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hashvault::{
    build, open_table, Approach, Blake3Hasher, BucketTable, BuildOptions, Generator, Geometry,
    LookupEngine, NonceHasher,
};

fn bench_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation");
    let pool = rayon::ThreadPoolBuilder::new().build().unwrap();

    // In-memory rounds only: no temp file, so the numbers are pure
    // hash-and-insert throughput.
    for k in [12u32, 14, 16] {
        let geo = Geometry::plan(k, 1 << 30, 1, 8).unwrap();
        let table = BucketTable::new(geo);
        group.throughput(criterion::Throughput::Elements(geo.per_round_records()));
        group.bench_with_input(BenchmarkId::new("round", k), &k, |b, _| {
            let generator = Generator::new(&Blake3Hasher, &table, 1024, Approach::For, true);
            b.iter(|| pool.install(|| generator.run_round(black_box(0))));
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let dir = tempfile::tempdir().unwrap();
    let pool = rayon::ThreadPoolBuilder::new().build().unwrap();

    let geo = Geometry::plan(14, 1 << 30, 1, 8).unwrap();
    let opts = BuildOptions {
        approach: Approach::For,
        batch_size: 1024,
        memory_write: true,
        temp_path: Some(dir.path().join("bench.tmp")),
        final_path: Some(dir.path().join("bench.dat")),
    };
    build(geo, &Blake3Hasher, &opts, &pool, None).unwrap();

    let (file, sidecar) = open_table(opts.final_path.as_ref().unwrap()).unwrap();
    let hasher = Blake3Hasher;
    let engine = LookupEngine::new(&file, &sidecar, &hasher);

    // Prefix of a nonce we know is in the table, and one that misses.
    let mut hit_prefix = [0u8; 3];
    hasher.digest(&1u64.to_le_bytes(), &mut hit_prefix);

    group.bench_function("hit", |b| {
        b.iter(|| pool.install(|| engine.lookup(black_box(&hit_prefix)).unwrap()))
    });
    group.bench_function("miss", |b| {
        let mut miss_prefix = hit_prefix;
        miss_prefix[2] ^= 0xff;
        b.iter(|| pool.install(|| engine.lookup(black_box(&miss_prefix)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_generation, bench_lookup);
criterion_main!(benches);
