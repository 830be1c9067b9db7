//! Benchmarks for header detection and row parsing.
//!
//! Benchmark targets:
//! - Mapping a 15-column header row: <50us
//! - Parsing one listing row: <20us

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use bulkport::io::{ColumnMapper, RowParser, listing};

const LISTING_HEADERS: &[&str] = &[
    "ID", "Type", "Title", "Status", "Description", "Published", "Featured", "Price",
    "Date created", "Categories", "Tags", "Images", "Attributes", "Parent", "Meta: color",
];

fn headers(extra_meta: usize) -> Vec<String> {
    LISTING_HEADERS
        .iter()
        .map(|h| (*h).to_string())
        .chain((0..extra_meta).map(|i| format!("Meta: key_{i}")))
        .collect()
}

fn bench_header_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_mapping");
    group.measurement_time(Duration::from_secs(5));

    let catalog = listing().catalog;
    group.bench_function("build_mapper", |b| {
        b.iter(|| ColumnMapper::new(black_box(&catalog)));
    });

    let mapper = ColumnMapper::new(&catalog).expect("listing catalog is valid");
    for extra in [0usize, 10, 100] {
        let row = headers(extra);
        group.throughput(Throughput::Elements(row.len() as u64));
        group.bench_with_input(BenchmarkId::new("map", row.len()), &row, |b, row| {
            b.iter(|| mapper.map(black_box(row)));
        });
    }

    group.bench_function("options_for", |b| {
        b.iter(|| mapper.options_for(black_box("Meta: color")));
    });

    group.finish();
}

fn bench_row_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_parsing");
    group.measurement_time(Duration::from_secs(5));

    let definition = listing();
    let mapper = ColumnMapper::new(&definition.catalog).expect("listing catalog is valid");
    let mapping = mapper.map(&headers(0)).expect("headers map");
    let parser = RowParser::new(&mapping, &definition.formatters, definition.family_targets());
    let cells: Vec<String> = [
        "12", "product", "Desk Lamp", "publish", "<p>Warm light</p>", "yes", "0", "19.99",
        "2024-03-01 10:00", "Home > Lighting, Sale", "lamp, desk", "https://a.example/1.jpg",
        r#"{"watts":40}"#, "", "brass",
    ]
    .iter()
    .map(|c| (*c).to_string())
    .collect();

    group.bench_function("listing_row", |b| {
        b.iter(|| parser.parse(black_box(&cells)));
    });

    group.finish();
}

criterion_group!(benches, bench_header_mapping, bench_row_parsing);

criterion_main!(benches);
