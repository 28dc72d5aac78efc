//! Benchmarks for the node-side reduction path
//! Covers chunk compression, per-shard partials and coordinator-side combining

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use sumcheck::reduce::{Combine, Decimal, Number, Partial, ReduceOp};
use sumcheck::store::{CellValue, ChunkBuilder, Shard, ShardBuilder};

/// Two-decimal cells with an NA every 97 rows
fn cents(rows: usize) -> Vec<CellValue> {
    (0..rows)
        .map(|i| {
            if i % 97 == 0 {
                CellValue::Na
            } else {
                CellValue::Decimal {
                    mantissa: (i as i64 * 7919) % 100_000 - 50_000,
                    exponent: -2,
                }
            }
        })
        .collect()
}

fn shard(rows: usize, columns: usize) -> Shard {
    let mut builder = ShardBuilder::new(columns, 4096);
    let cells = cents(rows);
    let mut row = vec![CellValue::Na; columns];
    for (i, cell) in cells.iter().enumerate() {
        for (c, slot) in row.iter_mut().enumerate() {
            *slot = if c % 2 == 0 {
                CellValue::integer((i % 1000) as i64)
            } else {
                *cell
            };
        }
        builder.push_row(&row).unwrap();
    }
    builder.finish()
}

fn bench_chunk_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_compression");

    for size in [1_000, 4_096, 65_536] {
        let cells = cents(size);
        group.bench_with_input(BenchmarkId::new("cents", size), &cells, |b, cells| {
            b.iter(|| {
                let mut builder = ChunkBuilder::with_capacity(cells.len());
                for cell in cells {
                    builder.push(*cell);
                }
                black_box(builder.finish())
            });
        });
    }

    group.finish();
}

fn bench_shard_partial(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_partial");
    let shard = shard(100_000, 4);

    for op in [ReduceOp::Sum, ReduceOp::Count, ReduceOp::Max] {
        group.bench_function(BenchmarkId::new("column_1", format!("{:?}", op)), |b| {
            b.iter(|| black_box(shard.partial(1, op).unwrap()));
        });
    }

    group.finish();
}

fn bench_partial_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_combine");

    for nodes in [4, 64, 1024] {
        let partials: Vec<Partial> = (0..nodes)
            .map(|i| Partial::Sum {
                value: Number::Exact(Decimal::new(i as i128 * 12_345, -2)),
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("sum", nodes), &partials, |b, partials| {
            b.iter(|| {
                black_box(Partial::identity(ReduceOp::Sum).combine_all(partials.iter().cloned()))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_compression,
    bench_shard_partial,
    bench_partial_combine
);
criterion_main!(benches);
