//! 🏎️ How fast do lines turn into `_bulk` bodies? Decode + render, no network.

use std::hint::black_box;
use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use esbulk::{Batch, DocumentDecoder, LineSource, render_bulk_payload};

fn synthetic_ndjson(docs: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for n in 0..docs {
        out.extend_from_slice(
            format!(
                "{{\"meta\":{{\"id\":\"doc-{n}\"}},\"title\":\"paper number {n}\",\"year\":{},\"tags\":[\"a\",\"b\"]}}\n",
                1990 + n % 30
            )
            .as_bytes(),
        );
    }
    out
}

fn decode_all(input: &[u8], id_field: Option<&str>) -> Batch {
    let decoder = DocumentDecoder::new(id_field);
    let documents = LineSource::new(Cursor::new(input.to_vec()), false)
        .filter_map(Result::ok)
        .filter_map(|raw| decoder.decode(raw).ok())
        .collect();
    Batch {
        sequence: 1,
        documents,
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let input = synthetic_ndjson(1_000);
    group.throughput(Throughput::Bytes(input.len() as u64));
    for id_field in [None, Some("meta.id")] {
        let label = id_field.unwrap_or("no_id");
        group.bench_with_input(BenchmarkId::from_parameter(label), &id_field, |b, id_field| {
            b.iter(|| black_box(decode_all(&input, *id_field)))
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_bulk_payload");
    for size in [100usize, 1_000, 10_000] {
        let batch = decode_all(&synthetic_ndjson(size), Some("meta.id"));
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| black_box(render_bulk_payload(batch, "papers", "default")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_render);
criterion_main!(benches);
