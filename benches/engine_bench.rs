//! Engine benchmarks.
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skiplsm::{DB, Options};
use tempfile::TempDir;

const PRELOADED: i64 = 100_000;

fn create_db(background: bool) -> (DB<i64, i64>, TempDir) {
    let dir = TempDir::new().unwrap();
    let opts = Options::new(dir.path())
        .elements_per_run(800)
        .memtable_runs(20)
        .background_compaction(background);
    (DB::open(opts).unwrap(), dir)
}

fn preloaded_db() -> (DB<i64, i64>, TempDir) {
    let (mut db, dir) = create_db(true);
    db.bulk_load((1..=PRELOADED).map(|k| (k, k * 2))).unwrap();
    db.await_compaction().unwrap();
    (db, dir)
}

fn bench_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    for background in [false, true] {
        let mode = if background { "background" } else { "sync" };
        group.bench_with_input(BenchmarkId::from_parameter(mode), &background, |b, &background| {
            let (mut db, _dir) = create_db(background);
            let mut key = 1i64;
            b.iter(|| {
                db.insert(black_box(key), black_box(key)).unwrap();
                key += 1;
            });
        });
    }

    group.finish();
}

fn bench_lookups(c: &mut Criterion) {
    let (mut db, _dir) = preloaded_db();
    let mut rng = StdRng::seed_from_u64(42);

    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        b.iter(|| {
            let key = rng.gen_range(1..=PRELOADED);
            black_box(db.lookup(key).unwrap());
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| {
            let key = rng.gen_range(PRELOADED + 1..PRELOADED * 2);
            black_box(db.lookup(key).unwrap());
        });
    });
    group.finish();
}

fn bench_ranges(c: &mut Criterion) {
    let (mut db, _dir) = preloaded_db();
    let mut rng = StdRng::seed_from_u64(7);

    let mut group = c.benchmark_group("range");
    for width in [10i64, 1_000] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let lo = rng.gen_range(1..PRELOADED - width);
                black_box(db.range(lo, lo + width).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inserts, bench_lookups, bench_ranges);
criterion_main!(benches);
