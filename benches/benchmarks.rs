use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fmi_accel::buffer::{partition, KmerCandidate, KmerQueryInfo, RegionSpec};
use fmi_accel::index::{FmiTable, PackedIndex};

/// 伪随机 BWT：rank 与搜索的开销只取决于条目布局，不要求是真实 BWT
fn make_bwt(len: usize) -> Vec<u8> {
    let mut seq = Vec::with_capacity(len + 1);
    let mut x: u32 = 42;
    for _ in 0..len {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        seq.push(((x >> 16) % 4) as u8);
    }
    seq.push(5); // $
    seq
}

fn make_pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            ((x >> 16) % 4) as u8
        })
        .collect()
}

fn bench_rank(c: &mut Criterion) {
    let idx = PackedIndex::from_bwt(&make_bwt(1_000_000));
    let positions: Vec<u64> = (0..1024u64).map(|i| (i * 977) % idx.bwt_len).collect();

    c.bench_function("rank_1k_positions", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for &p in &positions {
                acc = acc.wrapping_add(idx.rank(black_box(p), (p & 3) as u8));
            }
            black_box(acc)
        })
    });
}

fn bench_backward_search(c: &mut Criterion) {
    let idx = PackedIndex::from_bwt(&make_bwt(1_000_000));
    let table = FmiTable::build(&idx, 11, 10).expect("table");
    let pattern = make_pattern(20, 7);

    c.bench_function("backward_search_20bp", |b| {
        b.iter(|| {
            black_box(idx.backward_search(black_box(&pattern)));
        })
    });
    c.bench_function("table_search_20bp", |b| {
        b.iter(|| {
            black_box(table.search(&idx, black_box(&pattern)));
        })
    });
}

fn bench_build_table(c: &mut Criterion) {
    let idx = PackedIndex::from_bwt(&make_bwt(100_000));

    c.bench_function("build_table_8_levels", |b| {
        b.iter(|| {
            black_box(FmiTable::build(black_box(&idx), 8, 7).expect("table"));
        })
    });
}

fn bench_layout(c: &mut Criterion) {
    c.bench_function("kmer_layout", |b| {
        b.iter(|| {
            let n = black_box(100_000usize);
            black_box(partition(&[
                RegionSpec::input::<u8>("queries", n * 150 / 20),
                RegionSpec::input::<KmerQueryInfo>("query_info", n / 20),
                RegionSpec::input::<KmerCandidate>("candidates", n),
                RegionSpec::output::<u32>("alignments", n),
            ]))
        })
    });
}

criterion_group!(benches, bench_rank, bench_backward_search, bench_build_table, bench_layout);
criterion_main!(benches);
