//! Benchmarks for field coercion and cell rendering.
//!
//! Benchmark targets:
//! - Scalar coercion: <2us
//! - Date normalization: <10us
//! - Formula neutralization: <500ns

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use bulkport::io::FormatterKind;
use bulkport::io::escape::{format_cell, neutralize_formula};
use bulkport::io::formatter::{format, join_comma_list, normalize_date, split_comma_list};
use bulkport::models::FieldValue;

fn bench_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("coercion");
    group.measurement_time(Duration::from_secs(5));

    let cases = [
        ("int", FormatterKind::Int, "1,234"),
        ("bool", FormatterKind::Bool, "Yes"),
        ("float", FormatterKind::Float, "19.99"),
        ("json", FormatterKind::Json, r#"{"watts":40,"dims":[10,20]}"#),
        ("comma_list", FormatterKind::CommaList, "red, blue\\, navy, green"),
        ("urls", FormatterKind::Urls, "https://a.example/1.jpg, https://a.example/2.jpg"),
        ("clean", FormatterKind::Clean, "  <b>Desk</b>   lamp  "),
    ];
    for (name, kind, raw) in &cases {
        group.bench_function(*name, |b| {
            b.iter(|| format(black_box(raw), kind));
        });
    }

    group.finish();
}

fn bench_dates(c: &mut Criterion) {
    let mut group = c.benchmark_group("dates");
    group.measurement_time(Duration::from_secs(5));

    for input in ["2024-03-01", "2024-03-01 10:00:00", "03/01/2024", "March 1, 2024"] {
        group.bench_function(input, |b| {
            b.iter(|| normalize_date(black_box(input)));
        });
    }

    group.finish();
}

fn bench_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendering");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("neutralize_plain", |b| {
        b.iter(|| neutralize_formula(black_box("normal text")));
    });
    group.bench_function("neutralize_formula", |b| {
        b.iter(|| neutralize_formula(black_box("=HYPERLINK(\"x\")")));
    });

    let items: Vec<String> = (0..20).map(|i| format!("item, {i}")).collect();
    group.bench_function("join_split_list", |b| {
        b.iter(|| split_comma_list(&join_comma_list(black_box(&items))));
    });

    let value = FieldValue::Text("@SUM(A1:A9)".to_string());
    group.bench_function("format_cell", |b| {
        b.iter(|| format_cell(black_box(&value)));
    });

    group.finish();
}

criterion_group!(benches, bench_coercion, bench_dates, bench_rendering);

criterion_main!(benches);
