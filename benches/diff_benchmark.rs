//! Criterion benchmarks for the finding diff.
//!
//! ```sh
//! cargo bench --bench diff_benchmark
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use daca::diff::{diff_findings, split_findings};

/// Synthetic analyzer output with `n` diagnostics, each with a code excerpt.
fn synthetic_stream(n: usize, salt: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        let id = if (i + salt) % 7 == 0 { "nullPointer" } else { "unusedVariable" };
        out.push_str(&format!(
            "src/file{}.c:{}:5: style: Finding number {} [{}]\n    int x{} = 0;\n    ^\n",
            i % 50,
            i,
            i,
            id,
            i
        ));
    }
    out
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_findings");
    for n in [100, 1_000, 10_000] {
        let text = synthetic_stream(n, 0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &text, |b, text| {
            b.iter(|| split_findings(black_box(text)))
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_findings");
    for n in [100, 1_000, 10_000] {
        let left = split_findings(&synthetic_stream(n, 0));
        let right = split_findings(&synthetic_stream(n, 3));
        group.bench_with_input(
            BenchmarkId::from_parameter(n),
            &(left, right),
            |b, (left, right)| b.iter(|| diff_findings(black_box(left), black_box(right))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_split, bench_diff);
criterion_main!(benches);
