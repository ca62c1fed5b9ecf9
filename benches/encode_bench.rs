//! Encode/decode throughput.
//!
//! Usage:
//!   cargo bench --bench encode_bench

#[path = "../tests/common/mod.rs"]
mod common;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use spiece::EncodeOptions;

const PARAGRAPH: &str = "the quick brown fox jumped over the lazy dog while tokenizing \
    hello world sentences, naïve café patrons ordered 42 croissants and 😀 emoji. ";

fn bench_encode(c: &mut Criterion) {
    let model = common::byte_fallback_model();
    let options = EncodeOptions::with_bos_eos();
    let mut group = c.benchmark_group("encode");
    for repeat in [1usize, 16, 256] {
        let text = PARAGRAPH.repeat(repeat);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_function(format!("{}B", text.len()), |b| {
            b.iter(|| model.encode_as_ids(black_box(&text), &options))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let model = common::byte_fallback_model();
    let ids = model.encode_as_ids(&PARAGRAPH.repeat(16), &EncodeOptions::default());
    c.bench_function("decode", |b| {
        b.iter(|| model.decode_from_ids(black_box(&ids)))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
