//! Benchmarks for test runner summary parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forgeflow::harness::parse::{parse_jest, parse_julia, parse_pytest};

fn noisy(summary: &str) -> String {
    let mut out = String::new();
    for i in 0..500 {
        out.push_str(&format!("tests/test_app.py::test_case_{i} PASSED [ {}%]\n", i / 5));
    }
    out.push_str(summary);
    out
}

fn parse_benchmark(c: &mut Criterion) {
    let pytest = noisy("========== 498 passed, 2 failed in 3.21s ==========\n");
    let jest = noisy("Tests:       1 failed, 2 skipped, 497 passed, 500 total\n");
    let julia = noisy(
        "Test Summary: | Pass  Fail  Total  Time\napp          |  498     2    500  1.2s\n",
    );

    c.bench_function("parse_pytest", |b| b.iter(|| parse_pytest(black_box(&pytest))));
    c.bench_function("parse_jest", |b| b.iter(|| parse_jest(black_box(&jest))));
    c.bench_function("parse_julia", |b| b.iter(|| parse_julia(black_box(&julia))));
}

criterion_group!(benches, parse_benchmark);
criterion_main!(benches);
